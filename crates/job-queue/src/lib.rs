//! Job queue contracts and backends.
//!
//! [`JobQueue`] is the narrow client side used to publish work: one
//! `enqueue` call carrying a task type, a payload and [`EnqueueOptions`].
//! [`JobBroker`] adds the worker side (dequeue, ack, retry, dead-letter).
//!
//! Two backends are provided:
//! - [`InMemoryJobQueue`] for tests and single-process runs
//! - [`RedisJobQueue`] for production, using lists and sorted sets

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use common::JobId;
pub use error::{QueueError, Result};
pub use memory::InMemoryJobQueue;
pub use message::{DEFAULT_QUEUE, EnqueueOptions, JobInfo, JobMessage};
pub use queue::{JobBroker, JobQueue};
pub use redis_queue::RedisJobQueue;
