//! Order-processing error types.

use std::collections::BTreeMap;

use chain::{ChainError, ErrorKind, TaskError};
use common::{OrderId, ProductId};
use job_queue::QueueError;
use kv_store::KvError;
use thiserror::Error;

/// Errors raised by the durable catalog store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected a query or could not be reached.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row expected to exist is missing.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A stored value could not be mapped onto the model.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while placing or processing an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Input or a business rule was rejected; carries field-level detail.
    #[error("Validation failed: {}", describe_fields(.fields))]
    Validation { fields: BTreeMap<String, String> },

    /// A referenced product has no catalog entry or no inventory record.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order referenced by a task does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The payment gateway refused the charge.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Infrastructure failure. Only `public` is meant for callers.
    #[error("{public}")]
    Server { public: String, private: String },

    /// Catalog store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Inventory cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] KvError),

    /// Job queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Chain dispatch error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

impl OrderError {
    /// Validation error for a single field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        OrderError::Validation {
            fields: BTreeMap::from([(field.into(), message.into())]),
        }
    }

    pub fn server(public: impl Into<String>, private: impl Into<String>) -> Self {
        OrderError::Server {
            public: public.into(),
            private: private.into(),
        }
    }

    /// Class of this error in the task error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation { .. }
            | OrderError::ProductNotFound(_)
            | OrderError::OrderNotFound(_)
            | OrderError::PaymentDeclined(_) => ErrorKind::Validation,
            OrderError::Chain(ChainError::EmptyChain) => ErrorKind::Validation,
            OrderError::Chain(ChainError::NoHandler(_)) => ErrorKind::Configuration,
            _ => ErrorKind::Server,
        }
    }

    /// Field-level detail for validation errors.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            OrderError::Validation { fields } => Some(fields),
            _ => None,
        }
    }

    /// Detail for logs. Includes the private part of server errors.
    pub fn detail(&self) -> String {
        match self {
            OrderError::Server { public, private } => format!("{public}: {private}"),
            other => other.to_string(),
        }
    }
}

impl From<OrderError> for TaskError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Chain(e) => TaskError::from(e),
            other => match other.kind() {
                ErrorKind::Validation => TaskError::validation(other.detail()),
                ErrorKind::Configuration => TaskError::configuration(other.detail()),
                ErrorKind::Server => TaskError::server(other.detail()),
            },
        }
    }
}

fn describe_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for order results.
pub type Result<T> = std::result::Result<T, OrderError>;
