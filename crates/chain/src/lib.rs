//! Task chains: ordered lists of queued tasks run one step at a time.
//!
//! A [`Chain`] is built on the client side and dispatched as a single
//! message of the reserved [`CHAIN_TASK_TYPE`]. Its only durable state is
//! the [`ChainPayload`] inside that message. On the worker side the
//! [`ChainOrchestrator`] runs the payload's current step through the
//! [`HandlerRegistry`] and, on success, enqueues a new message for the next
//! step. A failing step is left to the queue's retry policy and the chain
//! does not move.

pub mod builder;
pub mod callback;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod orchestrator;
pub mod payload;
pub mod registry;
pub mod task;

pub use builder::{Chain, ChainOptions, DispatchInfo};
pub use callback::ChainFailure;
pub use common::ChainId;
pub use error::{ChainError, ErrorKind, Result, TaskError};
pub use handler::{ChainStep, DynHandler, Handler, JobContext, TypedHandler};
pub use ledger::{IdempotencyLedger, KvLedger, NoopLedger};
pub use orchestrator::{ChainOrchestrator, OrchestratorOptions};
pub use payload::ChainPayload;
pub use registry::HandlerRegistry;
pub use task::{CHAIN_TASK_TYPE, Task, TaskSpec, enqueue_task, validate_task_type};
