//! Worker-side chain execution.
//!
//! Each orchestrator message runs exactly one step:
//!
//! ```text
//! decode ──► complete? ──yes──► Ok (no message, no handler)
//!               │no
//!               ▼
//!          ledger says done? ──yes──────────────┐
//!               │no                             │
//!               ▼                               ▼
//!          run handler ──err──► Err (same payload is redelivered)
//!               │ok                             │
//!               ▼                               │
//!          mark done ──────────────────────────►│
//!                                               ▼
//!                           more steps? ──yes──► enqueue step + 1
//!                               │no
//!                               ▼
//!                       enqueue success callback
//! ```
//!
//! The next step's message only comes into existence after the current
//! step's handler returned success, which is what orders the steps of a
//! chain.
//!
//! Any error after the payload decoded, including a failed continuation, fires
//! the failure callback when it is not retryable or when this was the last
//! delivery attempt. The handler runs under the message's remaining
//! deadline minus a small reserve, so a step that hangs still gets its
//! callback out before the worker gives up on the message.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use job_queue::{JobInfo, JobQueue};

use crate::callback::failure_spec;
use crate::error::{ChainError, TaskError};
use crate::handler::{DynHandler, JobContext};
use crate::ledger::{IdempotencyLedger, NoopLedger};
use crate::payload::ChainPayload;
use crate::registry::HandlerRegistry;
use crate::task::{CHAIN_TASK_TYPE, TaskSpec};

/// Tuning for the chain orchestrator.
#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Delay before the next step becomes visible to workers.
    pub step_delay: Duration,
    pub ledger: Arc<dyn IdempotencyLedger>,
}

impl OrchestratorOptions {
    pub const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(1);

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        self.ledger = ledger;
        self
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            step_delay: Self::DEFAULT_STEP_DELAY,
            ledger: Arc::new(NoopLedger),
        }
    }
}

/// Handler for the reserved chain task type.
///
/// Created by [`HandlerRegistry::into_shared`]; holds a weak reference back
/// to the registry it dispatches steps into.
pub struct ChainOrchestrator {
    registry: Weak<HandlerRegistry>,
    queue: Arc<dyn JobQueue>,
    step_delay: Duration,
    ledger: Arc<dyn IdempotencyLedger>,
}

impl ChainOrchestrator {
    pub(crate) fn new(
        registry: Weak<HandlerRegistry>,
        queue: Arc<dyn JobQueue>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            queue,
            step_delay: options.step_delay,
            ledger: options.ledger,
        }
    }

    /// Runs the current step of the chain encoded in `payload`.
    ///
    /// A step handler's error is returned unchanged and the chain is not
    /// advanced. Timeouts surface as retryable server errors.
    #[tracing::instrument(
        skip(self, ctx, payload),
        fields(job_id = %ctx.job_id, chain_id = tracing::field::Empty, step = tracing::field::Empty)
    )]
    pub async fn run(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), TaskError> {
        let chain = ChainPayload::decode(payload).map_err(|e| {
            tracing::error!(error = %e, "Discarding malformed chain payload");
            TaskError::from(e)
        })?;

        let span = tracing::Span::current();
        span.record("chain_id", tracing::field::display(&chain.chain_id));
        span.record("step", chain.current_step);

        let Some(task) = chain.current_task() else {
            tracing::info!(total = chain.tasks.len(), "Chain already complete");
            return Ok(());
        };
        let step = chain.current_step;

        let already_done = self
            .ledger
            .is_done(&chain.chain_id, step)
            .await
            .map_err(TaskError::from)?;

        if already_done {
            metrics::counter!("chain_steps_total", "outcome" => "skipped").increment(1);
            tracing::info!(task_type = %task.task_type, "Step already completed, re-emitting continuation");
        } else {
            tracing::info!(
                task_type = %task.task_type,
                total = chain.tasks.len(),
                "Executing chain step"
            );
            let step_ctx = ctx.for_step(chain.chain_id.clone(), step);

            if let Err(err) = self.execute_step(&step_ctx, task).await {
                metrics::counter!("chain_steps_total", "outcome" => "failure").increment(1);
                tracing::warn!(
                    task_type = %task.task_type,
                    error = %err,
                    retried = ctx.retried,
                    max_retries = ctx.max_retries,
                    "Chain step failed"
                );
                return self.give_up_if_final(ctx, &chain, task, err).await;
            }

            metrics::counter!("chain_steps_total", "outcome" => "success").increment(1);
            if let Err(e) = self.ledger.mark_done(&chain.chain_id, step).await {
                tracing::warn!(error = %e, "Failed to record completed step");
                return self.give_up_if_final(ctx, &chain, task, e.into()).await;
            }
        }

        let next = chain.advance();
        if next.is_complete() {
            return self.complete_chain(&chain).await;
        }
        if let Err(err) = self.enqueue_next(&next).await {
            tracing::warn!(error = %err, "Failed to enqueue next chain step");
            return self.give_up_if_final(ctx, &chain, task, err).await;
        }
        Ok(())
    }

    /// Fires the failure callback when `err` ends the chain: on the last
    /// delivery attempt or for an error that is never retried. Returns
    /// `err` either way.
    async fn give_up_if_final(
        &self,
        ctx: &JobContext,
        chain: &ChainPayload,
        task: &TaskSpec,
        err: TaskError,
    ) -> Result<(), TaskError> {
        if ctx.is_final_attempt() || !err.is_retryable() {
            self.fail_chain(chain, task, &err).await;
        }
        Err(err)
    }

    async fn execute_step(&self, ctx: &JobContext, task: &TaskSpec) -> Result<(), TaskError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| TaskError::server("handler registry has been dropped"))?;
        let handler = registry
            .get(&task.task_type)
            .ok_or_else(|| ChainError::NoHandler(task.task_type.clone()))?;
        let bytes = task.payload_bytes()?;

        let Some(budget) = ctx.remaining().map(step_budget) else {
            return handler.process(ctx, &bytes).await;
        };
        match tokio::time::timeout(budget, handler.process(ctx, &bytes)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::server(format!(
                "step '{}' timed out after {}ms",
                task.task_type,
                budget.as_millis()
            ))),
        }
    }

    async fn enqueue_next(&self, next: &ChainPayload) -> Result<(), TaskError> {
        let info = self
            .queue
            .enqueue(
                CHAIN_TASK_TYPE,
                next.encode()?,
                next.enqueue_options().process_in(self.step_delay),
            )
            .await
            .map_err(ChainError::from)?;
        tracing::debug!(
            next_step = next.current_step,
            next_job_id = %info.id,
            "Next chain step enqueued"
        );
        Ok(())
    }

    async fn complete_chain(&self, chain: &ChainPayload) -> Result<(), TaskError> {
        metrics::counter!("chain_completed_total").increment(1);
        tracing::info!(total = chain.tasks.len(), "Chain completed");

        if let Some(callback) = &chain.on_success {
            let info = self.enqueue_callback(chain, callback).await?;
            tracing::debug!(
                task_type = %callback.task_type,
                callback_job_id = %info.id,
                "Success callback enqueued"
            );
        }
        Ok(())
    }

    async fn fail_chain(&self, chain: &ChainPayload, task: &TaskSpec, err: &TaskError) {
        metrics::counter!("chain_failed_total").increment(1);
        tracing::error!(
            task_type = %task.task_type,
            error = %err,
            "Chain failed"
        );

        let Some(callback) = &chain.on_failure else {
            return;
        };
        let spec = failure_spec(
            callback,
            &chain.chain_id,
            chain.current_step,
            &task.task_type,
            &err.to_string(),
        );
        if let Err(e) = self.enqueue_callback(chain, &spec).await {
            tracing::error!(
                task_type = %spec.task_type,
                error = %e,
                "Failed to enqueue failure callback"
            );
        }
    }

    async fn enqueue_callback(
        &self,
        chain: &ChainPayload,
        spec: &TaskSpec,
    ) -> Result<JobInfo, ChainError> {
        Ok(self
            .queue
            .enqueue(&spec.task_type, spec.payload_bytes()?, chain.enqueue_options())
            .await?)
    }
}

/// Part of the remaining delivery time given to a step handler. The rest
/// is kept so that a timed-out step can still be reported and its failure
/// callback enqueued before the worker abandons the message.
fn step_budget(remaining: Duration) -> Duration {
    let reserve = (remaining / 5).min(MAX_FAILURE_RESERVE);
    remaining - reserve
}

const MAX_FAILURE_RESERVE: Duration = Duration::from_secs(5);

#[async_trait]
impl DynHandler for ChainOrchestrator {
    async fn process(&self, ctx: &JobContext, payload: &[u8]) -> Result<(), TaskError> {
        self.run(ctx, payload).await
    }

    fn task_type(&self) -> &str {
        CHAIN_TASK_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_budget_keeps_a_reserve() {
        assert_eq!(
            step_budget(Duration::from_millis(100)),
            Duration::from_millis(80)
        );
        assert_eq!(
            step_budget(Duration::from_secs(180)),
            Duration::from_secs(175)
        );
        assert_eq!(step_budget(Duration::ZERO), Duration::ZERO);
    }
}
