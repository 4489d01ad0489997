//! Chain and task error types.

use job_queue::QueueError;
use kv_store::KvError;
use thiserror::Error;

/// Errors raised while building, dispatching or orchestrating a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A chain was dispatched without any task.
    #[error("Chain has no tasks")]
    EmptyChain,

    /// A chain payload could not be decoded or violates its invariants.
    #[error("Invalid chain payload: {0}")]
    Decode(String),

    /// A task or chain payload could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// No handler is registered for a task type.
    #[error("No handler registered for task type '{0}'")]
    NoHandler(String),

    /// A handler was registered twice for the same task type.
    #[error("Handler for task type '{0}' is already registered")]
    DuplicateHandler(String),

    /// A handler tried to claim the orchestrator's own task type.
    #[error("Task type '{0}' is reserved")]
    ReservedTaskType(String),

    /// A task type string is empty or contains whitespace.
    #[error("Invalid task type '{0}'")]
    InvalidTaskType(String),

    /// The job queue rejected a message.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The idempotency ledger could not be read or written.
    #[error("Ledger error: {0}")]
    Ledger(#[from] KvError),

    /// A step handler failed.
    #[error("Step failed: {0}")]
    Step(#[from] TaskError),
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Class of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a business rule violation; retrying will not help.
    Validation,
    /// Infrastructure failure; may succeed on a later attempt.
    Server,
    /// The process is misconfigured, e.g. a task type has no handler.
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Error returned by every task handler.
///
/// The worker retries a failed message only when [`is_retryable`] is true
/// and the message still has retry budget left.
///
/// [`is_retryable`]: TaskError::is_retryable
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TaskError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

impl TaskError {
    /// A non-retryable validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
            retryable: false,
        }
    }

    /// A retryable server failure.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Server,
            message: message.into(),
            retryable: true,
        }
    }

    /// A non-retryable configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            message: message.into(),
            retryable: false,
        }
    }

    /// Marks this error as not worth retrying.
    pub fn skip_retry(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<ChainError> for TaskError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Step(e) => e,
            ChainError::EmptyChain | ChainError::Decode(_) => TaskError::validation(err.to_string()),
            ChainError::NoHandler(_)
            | ChainError::DuplicateHandler(_)
            | ChainError::ReservedTaskType(_)
            | ChainError::InvalidTaskType(_) => TaskError::configuration(err.to_string()),
            ChainError::Encode(_) | ChainError::Queue(_) | ChainError::Ledger(_) => {
                TaskError::server(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_by_kind() {
        assert!(TaskError::server("redis down").is_retryable());
        assert!(!TaskError::validation("bad input").is_retryable());
        assert!(!TaskError::configuration("no handler").is_retryable());
        assert!(!TaskError::server("gave up").skip_retry().is_retryable());
    }

    #[test]
    fn test_no_handler_maps_to_configuration() {
        let err: TaskError = ChainError::NoHandler("x:y".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_step_error_passes_through() {
        let original = TaskError::server("payment gateway timeout");
        let err: TaskError = ChainError::Step(original.clone()).into();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.message(), original.message());
    }

    #[test]
    fn test_display() {
        let err = TaskError::validation("quantity must be positive");
        assert_eq!(err.to_string(), "validation error: quantity must be positive");
    }
}
