//! Wiring of the worker process.

use std::sync::Arc;

use chain::{HandlerRegistry, KvLedger, NoopLedger, OrchestratorOptions};
use job_queue::{JobBroker, JobQueue, RedisJobQueue};
use kv_store::{KeyValueStore, RedisKeyValueStore};
use orders::{
    CatalogStore, InMemoryCatalogStore, InMemoryPaymentGateway, InventoryService,
    NotificationOutbox, OrderHandlers, PostgresCatalogStore,
};
use tokio::sync::watch;

use crate::config::{Config, LedgerMode};
use crate::error::Result;
use crate::heartbeat::{heartbeat_period, spawn_heartbeat};
use crate::pool::{PoolOptions, WorkerPool};
use crate::reconcile::spawn_inventory_sync;

/// Orchestrator settings derived from the configuration.
pub fn orchestrator_options(config: &Config, cache: Arc<dyn KeyValueStore>) -> OrchestratorOptions {
    let options = OrchestratorOptions::default().with_step_delay(config.step_delay);
    match config.ledger {
        LedgerMode::None => options.with_ledger(Arc::new(NoopLedger)),
        LedgerMode::Kv => options.with_ledger(Arc::new(KvLedger::new(cache))),
    }
}

/// Registers every order handler and freezes the registry with the chain
/// orchestrator installed.
pub fn build_registry(
    handlers: &OrderHandlers,
    queue: Arc<dyn JobQueue>,
    options: OrchestratorOptions,
) -> Result<Arc<HandlerRegistry>> {
    let mut registry = HandlerRegistry::new();
    handlers.register(&mut registry)?;
    let registry = registry.into_shared(queue, options);

    tracing::info!(task_types = ?registry.registered_types(), "Handlers registered");
    Ok(registry)
}

/// A fully wired worker process.
pub struct App {
    config: Config,
    queue: RedisJobQueue,
    broker: Arc<dyn JobBroker>,
    registry: Arc<HandlerRegistry>,
    inventory: InventoryService,
}

impl App {
    /// Connects to Redis and the catalog store and registers the handlers.
    pub async fn connect(config: Config) -> Result<Self> {
        let queue = RedisJobQueue::new(&config.redis_queue_url)
            .await?
            .with_poll_interval(config.poll_interval);
        queue.heartbeat().await?;
        let recovered = queue.recover_in_flight(&config.queue_names()).await?;
        tracing::info!(worker_id = %queue.worker_id(), recovered, "Connected to job queue");
        let broker = Arc::new(queue.clone());

        let cache: Arc<dyn KeyValueStore> =
            Arc::new(RedisKeyValueStore::new(&config.redis_url).await?);
        tracing::info!("Connected to key-value store");

        let catalog: Arc<dyn CatalogStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresCatalogStore::connect(url).await?;
                store.run_migrations().await?;
                tracing::info!("Connected to PostgreSQL catalog");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using an in-memory catalog");
                Arc::new(InMemoryCatalogStore::new())
            }
        };

        let inventory = InventoryService::new(catalog.clone(), cache.clone());
        let handlers = OrderHandlers {
            catalog,
            inventory: inventory.clone(),
            payments: Arc::new(InMemoryPaymentGateway::new()),
            outbox: NotificationOutbox::new(),
        };
        let registry = build_registry(
            &handlers,
            broker.clone(),
            orchestrator_options(&config, cache),
        )?;

        Ok(Self {
            config,
            queue,
            broker,
            registry,
            inventory,
        })
    }

    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.broker.clone(),
            self.registry.clone(),
            PoolOptions {
                concurrency: self.config.concurrency,
                queues: self.config.queue_names(),
                retry_base_delay: self.config.retry_base_delay,
                poll_wait: self.config.poll_interval,
            },
        )
    }

    /// Runs the worker pool, the heartbeat and the reconciliation task
    /// until `shutdown` flips to true.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let heartbeat = spawn_heartbeat(
            self.queue.clone(),
            self.config.queue_names(),
            heartbeat_period(self.queue.heartbeat_ttl()),
            shutdown.clone(),
        );
        let sync = self.config.inventory_sync_interval.map(|period| {
            spawn_inventory_sync(self.inventory.clone(), period, shutdown.clone())
        });

        self.pool().run(shutdown).await;

        if let Err(e) = heartbeat.await {
            tracing::error!(error = %e, "Heartbeat task panicked");
        }

        if let Some(handle) = sync
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Inventory reconciliation task panicked");
        }
    }
}
