use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{EnqueueOptions, JobInfo, JobMessage};

/// Publishing side of the queue.
///
/// This is all a chain dispatcher or orchestrator needs: hand over a task
/// type, an opaque payload and a delivery policy, get back an
/// acknowledgment or an error.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Accepts one message for later delivery.
    ///
    /// Fails with [`QueueError::Duplicate`](crate::QueueError::Duplicate) if
    /// `options.unique_for` is set and an identical message is still inside
    /// its window.
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo>;
}

/// Worker side of the queue.
#[async_trait]
pub trait JobBroker: JobQueue {
    /// Takes the next ready message, checking `queues` in the given order.
    ///
    /// Waits up to `wait` for a message to arrive; returns `None` on
    /// timeout. A returned message is in flight until it is passed to
    /// [`ack`](Self::ack), [`retry`](Self::retry) or [`kill`](Self::kill).
    async fn dequeue(&self, queues: &[String], wait: Duration) -> Result<Option<JobMessage>>;

    /// Marks an in-flight message as done.
    async fn ack(&self, message: &JobMessage) -> Result<()>;

    /// Schedules an in-flight message for another attempt after `delay`.
    async fn retry(&self, message: JobMessage, error: &str, delay: Duration) -> Result<()>;

    /// Moves an in-flight message to the dead-letter set.
    async fn kill(&self, message: JobMessage, error: &str) -> Result<()>;
}
