//! Completion callbacks.
//!
//! A chain may carry a success task and a failure task. The success task is
//! enqueued as-is once the last step succeeds. The failure task is wrapped
//! in a [`ChainFailure`] that records which step gave up and why.

use common::ChainId;
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskSpec};

/// Payload delivered to a chain's failure callback.
///
/// Shares the callback's task type, so its handler is registered as
/// `registry.register::<ChainFailure<T>, _>(handler)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFailure<T> {
    pub chain_id: ChainId,
    pub failed_step: usize,
    /// Task type of the step that failed.
    pub task_type: String,
    pub error: String,
    /// The task passed to `Chain::on_failure`.
    pub callback: T,
}

impl<T: Task> Task for ChainFailure<T> {
    const TYPE: &'static str = T::TYPE;
}

/// Builds the failure callback message for a step that gave up.
pub(crate) fn failure_spec(
    callback: &TaskSpec,
    chain_id: &ChainId,
    failed_step: usize,
    task_type: &str,
    error: &str,
) -> TaskSpec {
    TaskSpec {
        task_type: callback.task_type.clone(),
        payload: serde_json::json!({
            "chain_id": chain_id,
            "failed_step": failed_step,
            "task_type": task_type,
            "error": error,
            "callback": callback.payload,
        }),
    }
}
