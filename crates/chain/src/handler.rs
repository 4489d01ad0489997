//! Typed handlers and their type-erased form.
//!
//! Application code implements [`Handler<T>`] for a concrete [`Task`]. The
//! registry stores handlers as [`DynHandler`] trait objects through the
//! [`TypedHandler`] adapter, which decodes the raw payload into `T` first.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use common::{ChainId, JobId};
use job_queue::JobMessage;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::task::Task;

/// Position of the current step when a handler runs inside a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub chain_id: ChainId,
    pub step: usize,
}

impl ChainStep {
    /// Key that is stable across redeliveries of the same step.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.chain_id, self.step)
    }
}

/// Delivery information passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: String,
    /// Failed attempts before this one.
    pub retried: u32,
    pub max_retries: u32,
    /// Point after which the worker abandons this attempt.
    pub deadline: Option<Instant>,
    /// Set when the handler runs as a chain step.
    pub chain: Option<ChainStep>,
}

impl JobContext {
    /// Context for a freshly dequeued message.
    pub fn from_message(message: &JobMessage) -> Self {
        Self {
            job_id: message.id,
            queue: message.queue.clone(),
            retried: message.retried,
            max_retries: message.max_retries,
            deadline: Some(Instant::now() + message.timeout),
            chain: None,
        }
    }

    /// Context for running a handler outside the worker, e.g. in tests.
    pub fn detached(queue: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            queue: queue.into(),
            retried: 0,
            max_retries: 0,
            deadline: None,
            chain: None,
        }
    }

    /// Sets the attempt counters.
    pub fn with_attempt(mut self, retried: u32, max_retries: u32) -> Self {
        self.retried = retried;
        self.max_retries = max_retries;
        self
    }

    /// Copy of this context for a step of a chain.
    pub fn for_step(&self, chain_id: ChainId, step: usize) -> Self {
        Self {
            chain: Some(ChainStep { chain_id, step }),
            ..self.clone()
        }
    }

    /// Returns true if a failure now will not be retried by the queue.
    pub fn is_final_attempt(&self) -> bool {
        self.retried >= self.max_retries
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Handler for one concrete task type.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &JobContext, task: T) -> Result<(), TaskError>;
}

/// Type-erased handler working on raw payload bytes.
#[async_trait]
pub trait DynHandler: Send + Sync {
    /// Processes one message payload.
    async fn process(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), TaskError>;

    /// Task type this handler serves.
    fn task_type(&self) -> &str;
}

/// Adapter from [`Handler<T>`] to [`DynHandler`].
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn process(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), TaskError> {
        let task: T = serde_json::from_slice(payload).map_err(|e| {
            TaskError::validation(format!("malformed {} payload: {e}", T::TYPE))
        })?;
        self.handler.handle(ctx, task).await
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Add {
        value: u32,
    }

    impl Task for Add {
        const TYPE: &'static str = "test:add";
    }

    #[derive(Default)]
    struct AddHandler {
        total: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Add> for AddHandler {
        async fn handle(&self, _ctx: &JobContext, task: Add) -> Result<(), TaskError> {
            self.total.fetch_add(task.value, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = AddHandler::default();
        let total = handler.total.clone();
        let typed = TypedHandler::<Add, _>::new(handler);

        let ctx = JobContext::detached("default");
        typed.process(&ctx, br#"{"value":5}"#).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(typed.task_type(), "test:add");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retryable() {
        let typed = TypedHandler::<Add, _>::new(AddHandler::default());
        let err = typed
            .process(&JobContext::detached("default"), b"not json")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_final_attempt() {
        let ctx = JobContext::detached("default").with_attempt(2, 3);
        assert!(!ctx.is_final_attempt());
        let ctx = ctx.with_attempt(3, 3);
        assert!(ctx.is_final_attempt());
    }

    #[test]
    fn test_step_context_carries_idempotency_key() {
        let chain_id = ChainId::from_string("CHAIN_X");
        let ctx = JobContext::detached("default").for_step(chain_id, 1);
        let step = ctx.chain.unwrap();
        assert_eq!(step.idempotency_key(), "CHAIN_X:1");
    }
}
