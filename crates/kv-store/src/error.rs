use thiserror::Error;

/// Errors that can occur when talking to the key-value store.
#[derive(Debug, Error)]
pub enum KvError {
    /// The Redis backend returned an error or was unreachable.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A value expected to hold an integer held something else.
    #[error("Value at {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },

    /// The reservation script returned a value outside its contract.
    #[error("Unexpected script result: {0}")]
    ScriptResult(i64),

    /// Keys and quantities passed to a reservation do not line up.
    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl KvError {
    /// Returns true if the error means the store could not be reached, as
    /// opposed to a problem with the data itself.
    pub fn is_connectivity(&self) -> bool {
        match self {
            KvError::Redis(e) => e.is_io_error() || e.is_connection_refusal() || e.is_timeout(),
            KvError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Result type for key-value store operations.
pub type Result<T> = std::result::Result<T, KvError>;
