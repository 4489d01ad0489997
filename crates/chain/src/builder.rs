//! Client-side chain builder.

use std::sync::Arc;
use std::time::Duration;

use common::ChainId;
use job_queue::{DEFAULT_QUEUE, JobInfo, JobQueue};

use crate::error::{ChainError, Result};
use crate::payload::ChainPayload;
use crate::task::{CHAIN_TASK_TYPE, ErasedTask, Task, TaskSpec};

/// Execution policy shared by every message of a chain.
///
/// `max_retries` is taken literally: `0` means one attempt per step and no
/// retry. An empty `queue` or a zero `timeout` cannot be run and falls back
/// to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOptions {
    pub queue: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl ChainOptions {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    /// Replaces an empty queue and a zero timeout with their defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            queue: if self.queue.is_empty() {
                defaults.queue
            } else {
                self.queue
            },
            max_retries: self.max_retries,
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
        }
    }
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Acknowledgment of a dispatched chain.
#[derive(Debug, Clone)]
pub struct DispatchInfo {
    pub chain_id: ChainId,
    pub job: JobInfo,
}

/// Ordered list of tasks plus the policy to run them with.
///
/// Nothing runs until [`dispatch`](Self::dispatch), which enqueues a single
/// orchestrator message and returns without waiting for any step.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use chain::{Chain, Task};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Serialize, Deserialize)] struct Reserve { order_id: i64 }
/// # impl Task for Reserve { const TYPE: &'static str = "inventory:check"; }
/// # #[derive(Serialize, Deserialize)] struct Charge { order_id: i64 }
/// # impl Task for Charge { const TYPE: &'static str = "process:payment"; }
/// # async fn example(queue: Arc<dyn job_queue::JobQueue>) -> chain::Result<()> {
/// let info = Chain::new(queue)
///     .then(Reserve { order_id: 1 })
///     .then(Charge { order_id: 1 })
///     .on_queue("order_processing_chain")
///     .max_retries(3)
///     .timeout(Duration::from_secs(180))
///     .dispatch()
///     .await?;
/// println!("dispatched {}", info.chain_id);
/// # Ok(())
/// # }
/// ```
pub struct Chain {
    queue: Arc<dyn JobQueue>,
    tasks: Vec<Box<dyn ErasedTask>>,
    options: ChainOptions,
    on_success: Option<Box<dyn ErasedTask>>,
    on_failure: Option<Box<dyn ErasedTask>>,
}

impl Chain {
    /// Starts an empty chain with default policy.
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self::with_options(queue, ChainOptions::default())
    }

    /// Starts an empty chain; an empty queue or zero timeout falls back to
    /// the default.
    pub fn with_options(queue: Arc<dyn JobQueue>, options: ChainOptions) -> Self {
        Self {
            queue,
            tasks: Vec::new(),
            options: options.normalized(),
            on_success: None,
            on_failure: None,
        }
    }

    /// Appends a task.
    pub fn then<T: Task>(mut self, task: T) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.options.queue = queue.into();
        self
    }

    /// Retries allowed per step after its first attempt; `0` disables
    /// retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Task enqueued after the last step succeeds.
    pub fn on_success<T: Task>(mut self, task: T) -> Self {
        self.on_success = Some(Box::new(task));
        self
    }

    /// Task enqueued, wrapped in a [`ChainFailure`](crate::ChainFailure),
    /// when a step fails for the last time.
    pub fn on_failure<T: Task>(mut self, task: T) -> Self {
        self.on_failure = Some(Box::new(task));
        self
    }

    /// Number of tasks added so far.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Serializes the chain and enqueues its first orchestrator message.
    ///
    /// Succeeds as soon as the message is accepted by the queue.
    #[tracing::instrument(skip_all)]
    pub async fn dispatch(self) -> Result<DispatchInfo> {
        if self.tasks.is_empty() {
            return Err(ChainError::EmptyChain);
        }

        let tasks = self
            .tasks
            .iter()
            .map(|task| task.to_spec())
            .collect::<Result<Vec<TaskSpec>>>()?;
        let on_success = self.on_success.as_ref().map(|t| t.to_spec()).transpose()?;
        let on_failure = self.on_failure.as_ref().map(|t| t.to_spec()).transpose()?;

        let options = self.options.normalized();
        let payload = ChainPayload {
            chain_id: ChainId::new(),
            tasks,
            current_step: 0,
            max_retries: options.max_retries,
            timeout: options.timeout,
            queue: options.queue,
            context: None,
            on_success,
            on_failure,
        };

        let job = self
            .queue
            .enqueue(CHAIN_TASK_TYPE, payload.encode()?, payload.enqueue_options())
            .await?;

        metrics::counter!("chain_dispatched_total").increment(1);
        tracing::info!(
            chain_id = %payload.chain_id,
            job_id = %job.id,
            queue = %job.queue,
            tasks = payload.tasks.len(),
            "Chain dispatched"
        );

        Ok(DispatchInfo {
            chain_id: payload.chain_id,
            job,
        })
    }
}

#[cfg(test)]
mod tests {
    use job_queue::InMemoryJobQueue;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Step {
        n: u32,
    }

    impl Task for Step {
        const TYPE: &'static str = "test:step";
    }

    #[derive(Serialize, Deserialize)]
    struct Other;

    impl Task for Other {
        const TYPE: &'static str = "test:other";
    }

    #[test]
    fn test_options_normalize_zero_values() {
        let options = ChainOptions {
            queue: String::new(),
            max_retries: 0,
            timeout: Duration::ZERO,
        }
        .normalized();
        assert_eq!(
            options,
            ChainOptions {
                max_retries: 0,
                ..ChainOptions::default()
            }
        );
    }

    #[tokio::test]
    async fn test_zero_max_retries_means_no_retry_on_both_paths() {
        let queue = InMemoryJobQueue::new();
        let from_options = ChainOptions {
            max_retries: 0,
            ..ChainOptions::default()
        };
        Chain::with_options(Arc::new(queue.clone()), from_options)
            .then(Step { n: 1 })
            .dispatch()
            .await
            .unwrap();
        Chain::new(Arc::new(queue.clone()))
            .then(Step { n: 2 })
            .max_retries(0)
            .on_queue("")
            .timeout(Duration::ZERO)
            .dispatch()
            .await
            .unwrap();

        let messages = queue.drain(DEFAULT_QUEUE).await;
        assert_eq!(messages.len(), 2);
        for message in &messages {
            assert_eq!(message.max_retries, 0);
            assert_eq!(message.queue, DEFAULT_QUEUE);
            assert_eq!(message.timeout, ChainOptions::DEFAULT_TIMEOUT);
        }
    }

    #[tokio::test]
    async fn test_dispatch_empty_chain_fails_without_enqueue() {
        let queue = InMemoryJobQueue::new();
        let err = Chain::new(Arc::new(queue.clone())).dispatch().await.unwrap_err();
        assert!(matches!(err, ChainError::EmptyChain));
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_enqueues_exactly_one_message() {
        let queue = InMemoryJobQueue::new();
        let info = Chain::new(Arc::new(queue.clone()))
            .then(Step { n: 1 })
            .then(Other)
            .on_queue("payments")
            .on_queue("order_processing_chain")
            .max_retries(5)
            .timeout(Duration::from_secs(60))
            .dispatch()
            .await
            .unwrap();

        let pending = queue.pending("order_processing_chain").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(queue.pending_count().await, 1);

        let message = &pending[0];
        assert_eq!(message.task_type, CHAIN_TASK_TYPE);
        assert_eq!(message.max_retries, 5);
        assert_eq!(message.timeout, Duration::from_secs(60));

        let payload = ChainPayload::decode(&message.payload).unwrap();
        assert_eq!(payload.chain_id, info.chain_id);
        assert_eq!(payload.current_step, 0);
        let types: Vec<_> = payload.tasks.iter().map(|t| t.task_type.as_str()).collect();
        assert_eq!(types, ["test:step", "test:other"]);
        assert!(payload.on_success.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_queue_unavailable() {
        let queue = InMemoryJobQueue::new();
        queue.set_unavailable(true).await;
        let err = Chain::new(Arc::new(queue))
            .then(Step { n: 1 })
            .dispatch()
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Queue(_)));
    }

    #[tokio::test]
    async fn test_callbacks_are_serialized() {
        let queue = InMemoryJobQueue::new();
        Chain::new(Arc::new(queue.clone()))
            .then(Step { n: 1 })
            .on_success(Other)
            .on_failure(Step { n: 99 })
            .dispatch()
            .await
            .unwrap();

        let message = &queue.pending("default").await[0];
        let payload = ChainPayload::decode(&message.payload).unwrap();
        assert_eq!(payload.on_success.unwrap().task_type, "test:other");
        let failure = payload.on_failure.unwrap();
        assert_eq!(failure.task_type, "test:step");
        assert_eq!(failure.payload, serde_json::json!({"n": 99}));
    }
}
