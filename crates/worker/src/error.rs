//! Worker process error types.

use chain::ChainError;
use job_queue::QueueError;
use kv_store::KvError;
use orders::StoreError;
use thiserror::Error;

/// Errors that stop the worker from starting or running.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// An environment variable holds a value that cannot be used.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Job queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Key-value store error.
    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),

    /// Catalog store error.
    #[error("Catalog store error: {0}")]
    Store(#[from] StoreError),

    /// Database migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] orders::MigrateError),

    /// Handler registration error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Logging or metrics could not be initialised.
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Convenience type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;
