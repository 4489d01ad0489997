//! Step completion ledger keyed by `(chain_id, step)`.
//!
//! Queues deliver at least once, so a step whose handler succeeded may be
//! delivered again (for example when the worker dies before acknowledging
//! it, or when enqueuing the continuation fails). With a ledger the
//! orchestrator skips the handler for a step it has already recorded and
//! only re-emits the continuation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ChainId;
use kv_store::KeyValueStore;

use crate::error::Result;

/// Records which chain steps have completed.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn is_done(&self, chain_id: &ChainId, step: usize) -> Result<bool>;

    async fn mark_done(&self, chain_id: &ChainId, step: usize) -> Result<()>;
}

/// Ledger that records nothing: every delivery runs its handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLedger;

#[async_trait]
impl IdempotencyLedger for NoopLedger {
    async fn is_done(&self, _chain_id: &ChainId, _step: usize) -> Result<bool> {
        Ok(false)
    }

    async fn mark_done(&self, _chain_id: &ChainId, _step: usize) -> Result<()> {
        Ok(())
    }
}

/// Ledger stored in the key-value store under `chain:{chain_id}:step:{n}`.
#[derive(Clone)]
pub struct KvLedger {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl KvLedger {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: Self::DEFAULT_TTL,
        }
    }

    /// Overrides how long completion records are kept.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(chain_id: &ChainId, step: usize) -> String {
        format!("chain:{chain_id}:step:{step}")
    }
}

#[async_trait]
impl IdempotencyLedger for KvLedger {
    async fn is_done(&self, chain_id: &ChainId, step: usize) -> Result<bool> {
        Ok(self.store.get(&Self::key(chain_id, step)).await?.is_some())
    }

    async fn mark_done(&self, chain_id: &ChainId, step: usize) -> Result<()> {
        self.store
            .set_if_absent(&Self::key(chain_id, step), "1", Some(self.ttl))
            .await?;
        Ok(())
    }
}
