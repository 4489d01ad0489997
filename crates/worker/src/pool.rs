//! Worker pool draining the job queue.
//!
//! Each worker task loops: dequeue, look up the handler, run it under the
//! message's timeout, then ack, retry with backoff, or dead-letter. A
//! shutdown signal stops workers between messages; a handler that is
//! already running is allowed to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chain::{HandlerRegistry, JobContext, TaskError};
use futures_util::future::join_all;
use job_queue::{JobBroker, JobMessage};
use tokio::sync::watch;

/// How the worker settles a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Retry(Duration),
    Kill,
}

/// Backoff before retry number `retried + 1`: `base * 2^retried`.
pub fn retry_delay(base: Duration, retried: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retried))
}

/// Chooses what to do with `message` after its handler returned `result`.
pub fn disposition(
    message: &JobMessage,
    result: &Result<(), TaskError>,
    retry_base: Duration,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(err) if err.is_retryable() && message.can_retry() => {
            Disposition::Retry(retry_delay(retry_base, message.retried))
        }
        Err(_) => Disposition::Kill,
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub concurrency: usize,
    /// Queues in polling order.
    pub queues: Vec<String>,
    pub retry_base_delay: Duration,
    /// How long one dequeue call waits for a message.
    pub poll_wait: Duration,
}

/// Fixed-size pool of worker tasks sharing one broker and registry.
#[derive(Clone)]
pub struct WorkerPool {
    broker: Arc<dyn JobBroker>,
    registry: Arc<HandlerRegistry>,
    options: PoolOptions,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        registry: Arc<HandlerRegistry>,
        options: PoolOptions,
    ) -> Self {
        Self {
            broker,
            registry,
            options,
        }
    }

    /// Runs the workers until `shutdown` flips to true, then waits for every
    /// in-flight message to settle.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let concurrency = self.options.concurrency.max(1);
        tracing::info!(
            concurrency,
            queues = ?self.options.queues,
            "Worker pool started"
        );

        let workers = (0..concurrency).map(|worker| {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pool.work(worker, shutdown).await })
        });
        for result in join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        tracing::info!("Worker pool stopped");
    }

    async fn work(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let dequeued = tokio::select! {
                _ = shutdown.changed() => break,
                dequeued = self.broker.dequeue(&self.options.queues, self.options.poll_wait) => dequeued,
            };

            match dequeued {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker, error = %e, "Dequeue failed");
                    tokio::time::sleep(self.options.poll_wait).await;
                }
            }
        }
        tracing::debug!(worker, "Worker stopped");
    }

    /// Runs one message through its handler and settles it with the broker.
    pub async fn process(&self, message: JobMessage) {
        let started = Instant::now();
        let result = self.execute(&message).await;
        let elapsed = started.elapsed();

        metrics::histogram!("job_duration_seconds", "task_type" => message.task_type.clone())
            .record(elapsed.as_secs_f64());

        let settled = match disposition(&message, &result, self.options.retry_base_delay) {
            Disposition::Ack => {
                metrics::counter!("jobs_processed_total", "outcome" => "success").increment(1);
                tracing::info!(
                    task_type = %message.task_type,
                    job_id = %message.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job processed"
                );
                self.broker.ack(&message).await
            }
            Disposition::Retry(delay) => {
                let error = failure_text(&result);
                metrics::counter!("jobs_processed_total", "outcome" => "retry").increment(1);
                tracing::warn!(
                    task_type = %message.task_type,
                    job_id = %message.id,
                    retry_count = message.retried,
                    max_retry = message.max_retries,
                    retry_in_secs = delay.as_secs(),
                    error = %error,
                    "Job failed, retrying"
                );
                self.broker.retry(message, &error, delay).await
            }
            Disposition::Kill => {
                let error = failure_text(&result);
                metrics::counter!("jobs_processed_total", "outcome" => "dead").increment(1);
                tracing::error!(
                    task_type = %message.task_type,
                    job_id = %message.id,
                    retry_count = message.retried,
                    max_retry = message.max_retries,
                    error = %error,
                    "Job failed permanently"
                );
                self.broker.kill(message, &error).await
            }
        };

        if let Err(e) = settled {
            tracing::error!(error = %e, "Failed to settle job with the broker");
        }
    }

    async fn execute(&self, message: &JobMessage) -> Result<(), TaskError> {
        let Some(handler) = self.registry.get(&message.task_type) else {
            return Err(TaskError::configuration(format!(
                "no handler registered for task type '{}'",
                message.task_type
            )));
        };

        let ctx = JobContext::from_message(message);
        match tokio::time::timeout(message.timeout, handler.process(&ctx, &message.payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(TaskError::server(format!(
                "task timed out after {}s",
                message.timeout.as_secs()
            ))),
        }
    }
}

fn failure_text(result: &Result<(), TaskError>) -> String {
    match result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}
