//! The [`Task`] trait and its serialized form.

use job_queue::{EnqueueOptions, JobInfo, JobQueue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

/// Task type reserved for the chain orchestrator's own messages.
pub const CHAIN_TASK_TYPE: &str = "chain:orchestrator";

/// A unit of work with a stable type name and a serializable payload.
///
/// The payload is the implementing type itself, encoded as JSON.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name used to route the task to its handler.
    const TYPE: &'static str;
}

/// A task in serialized form: its type name and JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// Serializes a typed task.
    pub fn from_task<T: Task>(task: &T) -> Result<Self> {
        Ok(Self {
            task_type: T::TYPE.to_string(),
            payload: serde_json::to_value(task)?,
        })
    }

    /// Payload bytes as a queue message would carry them.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

/// Checks that a task type is usable as a routing key.
pub fn validate_task_type(task_type: &str) -> Result<()> {
    if task_type.is_empty() || task_type.chars().any(char::is_whitespace) {
        return Err(ChainError::InvalidTaskType(task_type.to_string()));
    }
    Ok(())
}

/// Enqueues a single task outside of any chain.
pub async fn enqueue_task<T: Task>(
    queue: &dyn JobQueue,
    task: &T,
    options: EnqueueOptions,
) -> Result<JobInfo> {
    let payload = serde_json::to_vec(task)?;
    Ok(queue.enqueue(T::TYPE, payload, options).await?)
}

/// Object-safe view of a task, used to hold heterogeneous tasks in a chain
/// until it is dispatched.
pub(crate) trait ErasedTask: Send + Sync {
    fn to_spec(&self) -> Result<TaskSpec>;
}

impl<T: Task> ErasedTask for T {
    fn to_spec(&self) -> Result<TaskSpec> {
        TaskSpec::from_task(self)
    }
}
