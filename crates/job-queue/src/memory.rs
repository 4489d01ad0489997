use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::JobId;
use tokio::sync::{Mutex, Notify};

use crate::{
    QueueError, Result,
    message::{EnqueueOptions, JobInfo, JobMessage, after},
    queue::{JobBroker, JobQueue},
};

/// How often a waiting `dequeue` re-checks for delayed messages coming due.
const SCHEDULE_TICK: Duration = Duration::from_millis(25);

#[derive(Default)]
struct QueueState {
    ready: HashMap<String, VecDeque<JobMessage>>,
    scheduled: Vec<JobMessage>,
    active: HashMap<JobId, JobMessage>,
    dead: Vec<JobMessage>,
    unique: HashMap<String, DateTime<Utc>>,
    unavailable: bool,
}

impl QueueState {
    fn push(&mut self, message: JobMessage, now: DateTime<Utc>) {
        if message.is_ready(now) {
            self.ready
                .entry(message.queue.clone())
                .or_default()
                .push_back(message);
        } else {
            self.scheduled.push(message);
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        if self.scheduled.is_empty() {
            return;
        }
        self.scheduled.sort_by_key(|m| m.process_at);
        let split = self.scheduled.partition_point(|m| m.is_ready(now));
        let due: Vec<_> = self.scheduled.drain(..split).collect();
        for message in due {
            self.ready
                .entry(message.queue.clone())
                .or_default()
                .push_back(message);
        }
    }

    fn pop_first(&mut self, queues: &[String]) -> Option<JobMessage> {
        queues
            .iter()
            .find_map(|queue| self.ready.get_mut(queue).and_then(VecDeque::pop_front))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(QueueError::Unavailable(
                "in-memory queue marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory job queue for tests and single-process runs.
///
/// Implements both the publishing and worker sides with the same delivery
/// semantics as the Redis backend: delayed visibility, strict queue
/// ordering on dequeue, retry scheduling and a dead-letter list.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`QueueError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Returns the messages waiting in `queue`, ready ones first.
    pub async fn pending(&self, queue: &str) -> Vec<JobMessage> {
        let state = self.state.lock().await;
        let mut messages: Vec<_> = state
            .ready
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default();
        let mut scheduled: Vec<_> = state
            .scheduled
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect();
        scheduled.sort_by_key(|m| m.process_at);
        messages.extend(scheduled);
        messages
    }

    /// Returns the number of waiting messages across all queues.
    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.values().map(VecDeque::len).sum::<usize>() + state.scheduled.len()
    }

    /// Removes and returns every waiting message in `queue`, regardless of
    /// when it is due.
    pub async fn drain(&self, queue: &str) -> Vec<JobMessage> {
        let mut state = self.state.lock().await;
        let mut messages: Vec<_> = state
            .ready
            .remove(queue)
            .map(Vec::from)
            .unwrap_or_default();
        let (mut taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|m| m.queue == queue);
        state.scheduled = kept;
        taken.sort_by_key(|m| m.process_at);
        messages.extend(taken);
        messages
    }

    /// Returns the number of messages currently handed out to workers.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Returns the dead-lettered messages.
    pub async fn dead_letters(&self) -> Vec<JobMessage> {
        self.state.lock().await.dead.clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo> {
        let message = JobMessage::new(task_type, payload, &options);
        let now = Utc::now();

        let mut state = self.state.lock().await;
        state.check_available()?;

        if let (Some(key), Some(window)) = (&message.unique_key, options.unique_for) {
            if let Some(expires_at) = state.unique.get(key)
                && *expires_at > now
            {
                return Err(QueueError::Duplicate(key.clone()));
            }
            state.unique.insert(key.clone(), after(now, window));
        }

        let info = message.info();
        state.push(message, now);
        drop(state);

        self.notify.notify_one();
        Ok(info)
    }
}

#[async_trait]
impl JobBroker for InMemoryJobQueue {
    async fn dequeue(&self, queues: &[String], wait: Duration) -> Result<Option<JobMessage>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            {
                let mut state = self.state.lock().await;
                state.check_available()?;
                state.promote_due(Utc::now());
                if let Some(message) = state.pop_first(queues) {
                    state.active.insert(message.id, message.clone());
                    return Ok(Some(message));
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = (deadline - now).min(SCHEDULE_TICK);
            let _ = tokio::time::timeout(nap, self.notify.notified()).await;
        }
    }

    async fn ack(&self, message: &JobMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        state.active.remove(&message.id);
        if let Some(key) = &message.unique_key {
            state.unique.remove(key);
        }
        Ok(())
    }

    async fn retry(&self, mut message: JobMessage, error: &str, delay: Duration) -> Result<()> {
        let now = Utc::now();
        message.retried += 1;
        message.last_error = Some(error.to_string());
        message.process_at = after(now, delay);

        let mut state = self.state.lock().await;
        state.active.remove(&message.id);
        state.push(message, now);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    async fn kill(&self, mut message: JobMessage, error: &str) -> Result<()> {
        message.last_error = Some(error.to_string());

        let mut state = self.state.lock().await;
        state.active.remove(&message.id);
        state.dead.push(message);
        Ok(())
    }
}
