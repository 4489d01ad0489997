use thiserror::Error;

/// Errors that can occur when talking to the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The Redis backend returned an error or was unreachable.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An identical message is still inside its uniqueness window.
    #[error("Duplicate job rejected: {0}")]
    Duplicate(String),

    /// The queue backend cannot accept work right now.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
