//! Wire format of a running chain.

use std::time::Duration;

use common::ChainId;
use job_queue::EnqueueOptions;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::task::TaskSpec;

/// Resumable state of one chain run, carried inside each orchestrator
/// message.
///
/// A payload is never mutated once enqueued: progress is made by building
/// the next payload with [`advance`](Self::advance) and enqueuing it as a
/// new message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPayload {
    pub chain_id: ChainId,
    pub tasks: Vec<TaskSpec>,
    /// Index of the next task to run; equal to `tasks.len()` once complete.
    pub current_step: usize,
    pub max_retries: u32,
    /// Per-message timeout, in nanoseconds on the wire.
    #[serde(with = "duration_nanos")]
    pub timeout: Duration,
    pub queue: String,
    /// Data shared between steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<TaskSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<TaskSpec>,
}

impl ChainPayload {
    /// Decodes a payload and checks its step invariant.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload: ChainPayload =
            serde_json::from_slice(bytes).map_err(|e| ChainError::Decode(e.to_string()))?;
        if payload.current_step > payload.tasks.len() {
            return Err(ChainError::Decode(format!(
                "current_step {} is past the end of {} tasks",
                payload.current_step,
                payload.tasks.len()
            )));
        }
        Ok(payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns true once every task has run.
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.tasks.len()
    }

    /// The task to run next, if any.
    pub fn current_task(&self) -> Option<&TaskSpec> {
        self.tasks.get(self.current_step)
    }

    /// Payload for the following step. Saturates at completion.
    pub fn advance(&self) -> Self {
        Self {
            current_step: (self.current_step + 1).min(self.tasks.len()),
            ..self.clone()
        }
    }

    /// Queue options for messages belonging to this chain.
    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions::new()
            .queue(&self.queue)
            .max_retries(self.max_retries)
            .timeout(self.timeout)
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}
