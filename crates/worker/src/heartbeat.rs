//! Worker liveness and recovery of dead workers' in-flight jobs.

use std::time::Duration;

use async_trait::async_trait;
use job_queue::RedisJobQueue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Broker side of worker liveness.
#[async_trait]
pub trait WorkerMembership: Send + Sync + 'static {
    /// Marks this worker alive for another TTL.
    async fn heartbeat(&self) -> job_queue::Result<()>;

    /// Requeues the in-flight jobs of workers that stopped heartbeating.
    async fn recover_in_flight(&self, queues: &[String]) -> job_queue::Result<usize>;
}

#[async_trait]
impl WorkerMembership for RedisJobQueue {
    async fn heartbeat(&self) -> job_queue::Result<()> {
        RedisJobQueue::heartbeat(self).await
    }

    async fn recover_in_flight(&self, queues: &[String]) -> job_queue::Result<usize> {
        RedisJobQueue::recover_in_flight(self, queues).await
    }
}

/// Spawns a task that refreshes the worker's heartbeat and recovers dead
/// workers' jobs every `period`, until `shutdown` flips to true. The first
/// round runs immediately.
///
/// `period` should be well below the heartbeat TTL.
pub fn spawn_heartbeat<M: WorkerMembership>(
    membership: M,
    queues: Vec<String>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = membership.heartbeat().await {
                        tracing::error!(error = %e, "Worker heartbeat failed");
                        continue;
                    }
                    if let Err(e) = membership.recover_in_flight(&queues).await {
                        tracing::warn!(error = %e, "In-flight recovery failed");
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::debug!("Worker heartbeat stopped");
    })
}

/// Heartbeat period for a given TTL: three beats per TTL.
pub fn heartbeat_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(100))
}
