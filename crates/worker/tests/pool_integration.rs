//! Worker pool tests over the in-memory queue.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chain::{
    Chain, ChainFailure, Handler, HandlerRegistry, JobContext, OrchestratorOptions, Task,
    TaskError,
};
use job_queue::{EnqueueOptions, InMemoryJobQueue};
use kv_store::InMemoryKeyValueStore;
use orders::{
    CatalogStore, InMemoryCatalogStore, InMemoryPaymentGateway, InventoryService, LineItemRequest,
    Money, NewInventory, NewOrder, NewProduct, NotificationOutbox, OrderHandlers, OrderService,
    OrderStatus,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use worker::{PoolOptions, WorkerPool, build_registry};

#[derive(Debug, Serialize, Deserialize)]
struct Flaky {
    failures: u32,
}

impl Task for Flaky {
    const TYPE: &'static str = "test:flaky";
}

#[derive(Debug, Serialize, Deserialize)]
struct Rejected;

impl Task for Rejected {
    const TYPE: &'static str = "test:rejected";
}

#[derive(Debug, Serialize, Deserialize)]
struct Slow {
    millis: u64,
}

impl Task for Slow {
    const TYPE: &'static str = "test:slow";
}

#[derive(Debug, Serialize, Deserialize)]
struct Undo;

impl Task for Undo {
    const TYPE: &'static str = "test:undo";
}

#[derive(Clone, Default)]
struct Calls(Arc<AtomicU32>);

impl Calls {
    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

struct FlakyHandler(Calls);

#[async_trait]
impl Handler<Flaky> for FlakyHandler {
    async fn handle(&self, _ctx: &JobContext, task: Flaky) -> Result<(), TaskError> {
        if self.0.bump() <= task.failures {
            return Err(TaskError::server("backend unavailable"));
        }
        Ok(())
    }
}

struct RejectedHandler(Calls);

#[async_trait]
impl Handler<Rejected> for RejectedHandler {
    async fn handle(&self, _ctx: &JobContext, _task: Rejected) -> Result<(), TaskError> {
        self.0.bump();
        Err(TaskError::validation("malformed request"))
    }
}

struct SlowHandler {
    started: Calls,
    finished: Calls,
}

#[async_trait]
impl Handler<Slow> for SlowHandler {
    async fn handle(&self, _ctx: &JobContext, task: Slow) -> Result<(), TaskError> {
        self.started.bump();
        tokio::time::sleep(Duration::from_millis(task.millis)).await;
        self.finished.bump();
        Ok(())
    }
}

struct UndoHandler {
    calls: Calls,
    errors: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Handler<ChainFailure<Undo>> for UndoHandler {
    async fn handle(&self, _ctx: &JobContext, task: ChainFailure<Undo>) -> Result<(), TaskError> {
        self.errors.lock().unwrap().push(task.error);
        self.calls.bump();
        Ok(())
    }
}

struct Fixture {
    queue: InMemoryJobQueue,
    flaky: Calls,
    rejected: Calls,
    slow_started: Calls,
    slow_finished: Calls,
    undone: Calls,
    undo_errors: Arc<Mutex<Vec<String>>>,
    pool: WorkerPool,
}

impl Fixture {
    fn new() -> Self {
        let queue = InMemoryJobQueue::new();
        let flaky = Calls::default();
        let rejected = Calls::default();
        let slow_started = Calls::default();
        let slow_finished = Calls::default();
        let undone = Calls::default();
        let undo_errors = Arc::default();

        let mut registry = HandlerRegistry::new();
        registry
            .register::<Flaky, _>(FlakyHandler(flaky.clone()))
            .unwrap();
        registry
            .register::<Rejected, _>(RejectedHandler(rejected.clone()))
            .unwrap();
        registry
            .register::<Slow, _>(SlowHandler {
                started: slow_started.clone(),
                finished: slow_finished.clone(),
            })
            .unwrap();
        registry
            .register::<ChainFailure<Undo>, _>(UndoHandler {
                calls: undone.clone(),
                errors: Arc::clone(&undo_errors),
            })
            .unwrap();
        let registry = registry.into_shared(
            Arc::new(queue.clone()),
            OrchestratorOptions::default().with_step_delay(Duration::ZERO),
        );

        let pool = WorkerPool::new(Arc::new(queue.clone()), registry, pool_options(2));

        Self {
            queue,
            flaky,
            rejected,
            slow_started,
            slow_finished,
            undone,
            undo_errors,
            pool,
        }
    }
}

fn pool_options(concurrency: usize) -> PoolOptions {
    PoolOptions {
        concurrency,
        queues: vec!["default".to_string(), "low".to_string()],
        retry_base_delay: Duration::ZERO,
        poll_wait: Duration::from_millis(20),
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn enqueue<T: Task>(queue: &InMemoryJobQueue, task: &T, options: EnqueueOptions) {
    chain::enqueue_task(queue, task, options).await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let fixture = Fixture::new();
    enqueue(
        &fixture.queue,
        &Flaky { failures: 2 },
        EnqueueOptions::new().max_retries(3),
    )
    .await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let flaky = fixture.flaky.clone();
    wait_for(|| {
        let flaky = flaky.clone();
        async move { flaky.get() == 3 }
    })
    .await;
    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { queue.active_count().await == 0 }
    })
    .await;

    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.queue.pending_count().await, 0);
    assert!(fixture.queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_dead_letters_message() {
    let fixture = Fixture::new();
    enqueue(
        &fixture.queue,
        &Flaky { failures: 10 },
        EnqueueOptions::new().max_retries(2),
    )
    .await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { !queue.dead_letters().await.is_empty() }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.flaky.get(), 3);
    let dead = fixture.queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retried, 2);
    assert!(
        dead[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("backend unavailable")
    );
}

#[tokio::test]
async fn test_non_retryable_error_is_dead_lettered_immediately() {
    let fixture = Fixture::new();
    enqueue(
        &fixture.queue,
        &Rejected,
        EnqueueOptions::new().max_retries(5),
    )
    .await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { !queue.dead_letters().await.is_empty() }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.rejected.get(), 1);
    assert_eq!(fixture.queue.dead_letters().await[0].retried, 0);
}

#[tokio::test]
async fn test_handler_timeout_counts_as_failure() {
    let fixture = Fixture::new();
    enqueue(
        &fixture.queue,
        &Slow { millis: 5_000 },
        EnqueueOptions::new()
            .max_retries(0)
            .timeout(Duration::from_millis(50)),
    )
    .await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { !queue.dead_letters().await.is_empty() }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.slow_started.get(), 1);
    assert_eq!(fixture.slow_finished.get(), 0);
    let dead = fixture.queue.dead_letters().await;
    assert!(dead[0].last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_timed_out_chain_step_runs_failure_callback() {
    let fixture = Fixture::new();
    Chain::new(Arc::new(fixture.queue.clone()))
        .on_queue("default")
        .then(Slow { millis: 5_000 })
        .on_failure(Undo)
        .max_retries(1)
        .timeout(Duration::from_millis(500))
        .dispatch()
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let undone = fixture.undone.clone();
    wait_for(|| {
        let undone = undone.clone();
        async move { undone.get() == 1 }
    })
    .await;
    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { !queue.dead_letters().await.is_empty() }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.slow_started.get(), 2);
    assert_eq!(fixture.slow_finished.get(), 0);
    assert!(fixture.undo_errors.lock().unwrap()[0].contains("timed out"));
    let dead = fixture.queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task_type, chain::CHAIN_TASK_TYPE);
    assert_eq!(dead[0].retried, 1);
    assert_eq!(fixture.undone.get(), 1);
}

#[tokio::test]
async fn test_unregistered_task_type_is_dead_lettered() {
    let fixture = Fixture::new();
    job_queue::JobQueue::enqueue(
        &fixture.queue,
        "test:unknown",
        b"{}".to_vec(),
        EnqueueOptions::new().max_retries(3),
    )
    .await
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let queue = fixture.queue.clone();
    wait_for(|| {
        let queue = queue.clone();
        async move { !queue.dead_letters().await.is_empty() }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    let dead = fixture.queue.dead_letters().await;
    assert_eq!(dead[0].retried, 0);
    assert!(dead[0].last_error.as_deref().unwrap().contains("no handler"));
}

#[tokio::test]
async fn test_shutdown_lets_running_handler_finish() {
    let fixture = Fixture::new();
    enqueue(&fixture.queue, &Slow { millis: 200 }, EnqueueOptions::new()).await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(fixture.pool.clone().run(rx));

    let started = fixture.slow_started.clone();
    wait_for(|| {
        let started = started.clone();
        async move { started.get() == 1 }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(fixture.slow_finished.get(), 1);
    assert_eq!(fixture.queue.active_count().await, 0);
    assert!(fixture.queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_pool_drives_order_chain_to_paid() {
    let queue = InMemoryJobQueue::new();
    let catalog = InMemoryCatalogStore::new();
    let cache = InMemoryKeyValueStore::new();
    let outbox = NotificationOutbox::new();
    let catalog_store: Arc<dyn CatalogStore> = Arc::new(catalog.clone());

    let product = catalog
        .create_product(NewProduct {
            name: "Lamp".to_string(),
            sku: "LAMP-1".to_string(),
            price: Money::from_cents(2_500),
        })
        .await
        .unwrap();
    let record = catalog
        .create_inventory(NewInventory {
            product_id: product.id,
            quantity: 10,
            reorder_point: 2,
            location: "main".to_string(),
        })
        .await
        .unwrap();

    let inventory = InventoryService::new(catalog_store.clone(), Arc::new(cache.clone()));
    let handlers = OrderHandlers {
        catalog: catalog_store.clone(),
        inventory: inventory.clone(),
        payments: Arc::new(InMemoryPaymentGateway::new()),
        outbox: outbox.clone(),
    };
    let registry = build_registry(
        &handlers,
        Arc::new(queue.clone()),
        OrchestratorOptions::default().with_step_delay(Duration::ZERO),
    )
    .unwrap();

    let mut options = pool_options(4);
    options.queues = orders::queues::ALL
        .iter()
        .map(|queue| queue.to_string())
        .collect();
    let pool = WorkerPool::new(Arc::new(queue.clone()), registry, options);

    let service = OrderService::new(catalog_store.clone(), Arc::new(queue.clone()));
    let placed = service
        .place_order(NewOrder {
            user_id: 7,
            items: vec![LineItemRequest {
                product_id: product.id,
                quantity: 3,
            }],
            shipping_address: "1 Harbour Rd".to_string(),
            billing_address: "1 Harbour Rd".to_string(),
            notes: None,
        })
        .await
        .unwrap();
    let order_id = placed.order.id;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(pool.run(rx));

    let watched = outbox.clone();
    wait_for(|| {
        let outbox = watched.clone();
        async move { outbox.delivered().await.len() == 1 }
    })
    .await;
    tx.send(true).unwrap();
    running.await.unwrap();

    let order = catalog.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(inventory.available(product.id).await.unwrap(), Some(7));
    assert_eq!(catalog.inventory_quantity(record.id).await, Some(10));
    assert!(queue.dead_letters().await.is_empty());
}
