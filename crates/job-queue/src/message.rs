//! Message and option types exchanged with the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::JobId;
use serde::{Deserialize, Serialize};

/// Queue name used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Default retry budget for a message.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-delivery timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Delivery policy attached to one enqueued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Target queue name.
    pub queue: String,
    /// Number of retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Per-attempt processing timeout.
    pub timeout: Duration,
    /// Delay before the message becomes visible to workers.
    pub process_in: Option<Duration>,
    /// Rejects identical messages (same queue, type and payload) for this long.
    pub unique_for: Option<Duration>,
}

impl EnqueueOptions {
    /// Creates options with the default queue and retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Sets the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delays visibility of the message.
    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = Some(delay);
        self
    }

    /// Enables duplicate rejection for the given window.
    pub fn unique_for(mut self, window: Duration) -> Self {
        self.unique_for = Some(window);
        self
    }
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            process_in: None,
            unique_for: None,
        }
    }
}

/// Acknowledgment returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub queue: String,
    pub task_type: String,
    pub process_at: DateTime<Utc>,
}

/// A message as stored in and delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: JobId,
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub max_retries: u32,
    /// Number of failed attempts so far.
    pub retried: u32,
    pub timeout: Duration,
    pub enqueued_at: DateTime<Utc>,
    pub process_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub unique_key: Option<String>,

    /// Backend-specific handle used to acknowledge this delivery.
    #[serde(skip)]
    pub(crate) lease: Option<String>,
}

impl JobMessage {
    /// Builds a fresh message from a task type, payload and options.
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>, options: &EnqueueOptions) -> Self {
        let task_type = task_type.into();
        let now = Utc::now();
        let process_at = options.process_in.map_or(now, |delay| after(now, delay));
        let unique_key = options
            .unique_for
            .map(|_| unique_key(&options.queue, &task_type, &payload));

        Self {
            id: JobId::new(),
            task_type,
            payload,
            queue: options.queue.clone(),
            max_retries: options.max_retries,
            retried: 0,
            timeout: options.timeout,
            enqueued_at: now,
            process_at,
            last_error: None,
            unique_key,
            lease: None,
        }
    }

    /// Returns true if another failed attempt may still be retried.
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retries
    }

    /// Returns true if the message may be handed to a worker at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.process_at <= now
    }

    /// Acknowledgment view of this message.
    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            queue: self.queue.clone(),
            task_type: self.task_type.clone(),
            process_at: self.process_at,
        }
    }
}

/// Key identifying "the same message" for duplicate rejection.
pub fn unique_key(queue: &str, task_type: &str, payload: &[u8]) -> String {
    format!("{queue}:{task_type}:{}", String::from_utf8_lossy(payload))
}

/// Adds a std duration to a timestamp, saturating at the far future.
pub(crate) fn after(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
