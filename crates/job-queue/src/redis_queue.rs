//! Redis-backed job queue.
//!
//! # Layout
//!
//! Per queue name `q`:
//! - `jobs:queue:{q}`: list of ready messages (LPUSH in, RPOPLPUSH out)
//! - `jobs:active:{q}:{worker}`: list of messages handed to one worker
//! - `jobs:scheduled:{q}`: sorted set of delayed messages scored by due time (ms)
//! - `jobs:dead:{q}`: sorted set of dead-lettered messages scored by death time (ms)
//!
//! Uniqueness locks live under `jobs:unique:{key}` with a PX expiry.
//!
//! Every [`RedisJobQueue`] handle has its own worker id. The id is listed in
//! the `jobs:workers` set and kept alive by [`RedisJobQueue::heartbeat`],
//! which refreshes `jobs:worker:{worker}` with a PX expiry. A worker that
//! crashes leaves its messages in its active lists; once its heartbeat key
//! has expired, [`RedisJobQueue::recover_in_flight`] run by any other worker
//! moves them back to the ready lists. Live workers' lists are never touched.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::{
    QueueError, Result,
    message::{EnqueueOptions, JobInfo, JobMessage},
    queue::{JobBroker, JobQueue},
};

/// Moves due members of a scheduled set onto the head of a ready list.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, 100)
for _, member in ipairs(due) do
  redis.call("LPUSH", KEYS[2], member)
  redis.call("ZREM", KEYS[1], member)
end
return #due
"#;

/// Default pause between polling rounds when every queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default lifetime of a worker's heartbeat key.
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);

const WORKERS_KEY: &str = "jobs:workers";

/// Job queue stored in Redis lists and sorted sets.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn_manager: ConnectionManager,
    poll_interval: Duration,
    worker_id: String,
    heartbeat_ttl: Duration,
}

impl RedisJobQueue {
    /// Connects to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn_manager,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker_id: uuid::Uuid::new_v4().to_string(),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
        })
    }

    /// Overrides the pause between polling rounds.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides how long the heartbeat key outlives the last
    /// [`heartbeat`](Self::heartbeat).
    pub fn with_heartbeat_ttl(mut self, heartbeat_ttl: Duration) -> Self {
        self.heartbeat_ttl = heartbeat_ttl;
        self
    }

    /// Id under which this handle leases messages.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_ttl
    }

    fn ready_key(queue: &str) -> String {
        format!("jobs:queue:{queue}")
    }

    fn active_key(queue: &str, worker_id: &str) -> String {
        format!("jobs:active:{queue}:{worker_id}")
    }

    fn heartbeat_key(worker_id: &str) -> String {
        format!("jobs:worker:{worker_id}")
    }

    fn scheduled_key(queue: &str) -> String {
        format!("jobs:scheduled:{queue}")
    }

    fn dead_key(queue: &str) -> String {
        format!("jobs:dead:{queue}")
    }

    fn unique_lock_key(key: &str) -> String {
        format!("jobs:unique:{key}")
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Registers this worker and extends its heartbeat key by the
    /// heartbeat TTL. Call at least once per TTL while the worker runs.
    pub async fn heartbeat(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let ttl_ms = u64::try_from(self.heartbeat_ttl.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);

        let _: () = redis::pipe()
            .atomic()
            .sadd(WORKERS_KEY, &self.worker_id)
            .ignore()
            .pset_ex(Self::heartbeat_key(&self.worker_id), Self::now_ms(), ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Moves the messages held by workers whose heartbeat has expired back
    /// to the ready lists of `queues`, then forgets those workers. Returns
    /// how many messages were recovered.
    ///
    /// Safe to run while other workers are processing: only lists of
    /// workers without a live heartbeat key are drained.
    pub async fn recover_in_flight(&self, queues: &[String]) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        let workers: Vec<String> = conn.smembers(WORKERS_KEY).await?;
        let mut recovered = 0;

        for worker in workers {
            if worker == self.worker_id {
                continue;
            }
            let alive: bool = conn.exists(Self::heartbeat_key(&worker)).await?;
            if alive {
                continue;
            }

            let mut from_worker = 0;
            for queue in queues {
                let active = Self::active_key(queue, &worker);
                let ready = Self::ready_key(queue);
                loop {
                    let moved: Option<String> = conn.rpoplpush(&active, &ready).await?;
                    if moved.is_none() {
                        break;
                    }
                    from_worker += 1;
                }
            }
            let _: () = conn.srem(WORKERS_KEY, &worker).await?;

            if from_worker > 0 {
                tracing::warn!(worker = %worker, recovered = from_worker, "Recovered in-flight jobs of a dead worker");
            }
            recovered += from_worker;
        }
        Ok(recovered)
    }

    /// Returns the number of ready plus scheduled messages in `queue`.
    pub async fn pending_count(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        let ready: usize = conn.llen(Self::ready_key(queue)).await?;
        let scheduled: usize = conn.zcard(Self::scheduled_key(queue)).await?;
        Ok(ready + scheduled)
    }

    /// Returns the dead-lettered messages of `queue`. Entries that do not
    /// decode as a message are skipped.
    pub async fn dead_letters(&self, queue: &str) -> Result<Vec<JobMessage>> {
        let mut conn = self.conn_manager.clone();
        let raw: Vec<String> = conn.zrange(Self::dead_key(queue), 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect())
    }

    /// Number of entries in the dead-letter set of `queue`, undecodable
    /// ones included.
    pub async fn dead_count(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.zcard(Self::dead_key(queue)).await?)
    }

    async fn promote_due(&self, conn: &mut ConnectionManager, queue: &str) -> Result<()> {
        let script = redis::Script::new(PROMOTE_SCRIPT);
        let promoted: i64 = script
            .key(Self::scheduled_key(queue))
            .key(Self::ready_key(queue))
            .arg(Self::now_ms())
            .invoke_async(conn)
            .await?;
        if promoted > 0 {
            tracing::debug!(queue, promoted, "Promoted scheduled jobs");
        }
        Ok(())
    }

    async fn try_dequeue(&self, queues: &[String]) -> Result<Option<JobMessage>> {
        let mut conn = self.conn_manager.clone();

        for queue in queues {
            self.promote_due(&mut conn, queue).await?;

            let active = Self::active_key(queue, &self.worker_id);
            let raw: Option<String> = conn.rpoplpush(Self::ready_key(queue), &active).await?;
            let Some(raw) = raw else {
                continue;
            };

            match serde_json::from_str::<JobMessage>(&raw) {
                Ok(mut message) => {
                    message.lease = Some(raw);
                    return Ok(Some(message));
                }
                Err(e) => {
                    tracing::error!(queue = %queue, error = %e, "Dead-lettering undecodable job");
                    let _: () = redis::pipe()
                        .atomic()
                        .lrem(&active, 1, &raw)
                        .ignore()
                        .zadd(Self::dead_key(queue), &raw, Self::now_ms())
                        .ignore()
                        .query_async(&mut conn)
                        .await?;
                }
            }
        }

        Ok(None)
    }

    /// Removes an in-flight message from its active list and stores
    /// `updated` under `target` with `score`, atomically.
    async fn move_active(
        &self,
        original: &JobMessage,
        updated: &JobMessage,
        target: String,
        score: i64,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let lease = Self::lease_of(original)?;
        let raw = serde_json::to_string(updated)?;

        let _: () = redis::pipe()
            .atomic()
            .lrem(Self::active_key(&original.queue, &self.worker_id), 1, lease)
            .ignore()
            .zadd(target, raw, score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn lease_of(message: &JobMessage) -> Result<&str> {
        message.lease.as_deref().ok_or_else(|| {
            QueueError::Unavailable(format!("job {} was not dequeued from Redis", message.id))
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo> {
        let message = JobMessage::new(task_type, payload, &options);
        let mut conn = self.conn_manager.clone();

        if let (Some(key), Some(window)) = (&message.unique_key, options.unique_for) {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(Self::unique_lock_key(key))
                .arg(message.id.to_string())
                .arg("NX")
                .arg("PX")
                .arg(u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1))
                .query_async(&mut conn)
                .await?;
            if acquired.is_none() {
                return Err(QueueError::Duplicate(key.clone()));
            }
        }

        let raw = serde_json::to_string(&message)?;
        if message.is_ready(Utc::now()) {
            let _: () = conn.lpush(Self::ready_key(&message.queue), raw).await?;
        } else {
            let _: () = conn
                .zadd(
                    Self::scheduled_key(&message.queue),
                    raw,
                    message.process_at.timestamp_millis(),
                )
                .await?;
        }

        tracing::debug!(
            job_id = %message.id,
            task_type = %message.task_type,
            queue = %message.queue,
            process_at = %message.process_at,
            "Job enqueued"
        );
        Ok(message.info())
    }
}

#[async_trait]
impl JobBroker for RedisJobQueue {
    async fn dequeue(&self, queues: &[String], wait: Duration) -> Result<Option<JobMessage>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if let Some(message) = self.try_dequeue(queues).await? {
                return Ok(Some(message));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }
    }

    async fn ack(&self, message: &JobMessage) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let lease = Self::lease_of(message)?;

        let _: () = conn
            .lrem(Self::active_key(&message.queue, &self.worker_id), 1, lease)
            .await?;
        if let Some(key) = &message.unique_key {
            let _: () = conn.del(Self::unique_lock_key(key)).await?;
        }
        Ok(())
    }

    async fn retry(&self, message: JobMessage, error: &str, delay: Duration) -> Result<()> {
        let mut updated = message.clone();
        updated.retried += 1;
        updated.last_error = Some(error.to_string());
        updated.process_at = crate::message::after(Utc::now(), delay);

        let score = updated.process_at.timestamp_millis();
        self.move_active(&message, &updated, Self::scheduled_key(&message.queue), score)
            .await
    }

    async fn kill(&self, message: JobMessage, error: &str) -> Result<()> {
        let mut updated = message.clone();
        updated.last_error = Some(error.to_string());

        self.move_active(&message, &updated, Self::dead_key(&message.queue), Self::now_ms())
            .await
    }
}
