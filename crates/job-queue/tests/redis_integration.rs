//! Redis integration tests
//!
//! These tests share one Redis container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p job-queue --test redis_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use job_queue::{EnqueueOptions, JobBroker, JobQueue, QueueError, RedisJobQueue};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(REDIS_PORT).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("redis://{host}:{port}"),
            })
        })
        .await
        .clone()
}

/// Fresh queue over a flushed database
async fn get_test_queue() -> RedisJobQueue {
    let info = get_container_info().await;

    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    connect_worker().await
}

/// Another worker handle on the same database
async fn connect_worker() -> RedisJobQueue {
    let info = get_container_info().await;
    RedisJobQueue::new(&info.url)
        .await
        .unwrap()
        .with_poll_interval(Duration::from_millis(20))
}

fn queues(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn enqueue_dequeue_ack() {
    let queue = get_test_queue().await;
    let info = queue
        .enqueue("test:task", b"{\"n\":1}".to_vec(), EnqueueOptions::new())
        .await
        .unwrap();

    let message = queue
        .dequeue(&queues(&["default"]), Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.id, info.id);
    assert_eq!(message.payload, b"{\"n\":1}");

    queue.ack(&message).await.unwrap();
    assert_eq!(queue.pending_count("default").await.unwrap(), 0);
    assert_eq!(queue.recover_in_flight(&queues(&["default"])).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn delayed_job_is_promoted_when_due() {
    let queue = get_test_queue().await;
    queue
        .enqueue(
            "later",
            vec![],
            EnqueueOptions::new().process_in(Duration::from_millis(200)),
        )
        .await
        .unwrap();

    let names = queues(&["default"]);
    assert!(queue.dequeue(&names, Duration::ZERO).await.unwrap().is_none());

    let message = queue.dequeue(&names, Duration::from_secs(3)).await.unwrap();
    assert_eq!(message.unwrap().task_type, "later");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn queue_order_is_respected() {
    let queue = get_test_queue().await;
    queue
        .enqueue("low", vec![], EnqueueOptions::new().queue("low"))
        .await
        .unwrap();
    queue
        .enqueue("critical", vec![], EnqueueOptions::new().queue("critical"))
        .await
        .unwrap();

    let message = queue
        .dequeue(&queues(&["critical", "low"]), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.task_type, "critical");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unique_jobs_are_rejected() {
    let queue = get_test_queue().await;
    let options = EnqueueOptions::new().unique_for(Duration::from_secs(30));

    queue.enqueue("u", b"x".to_vec(), options.clone()).await.unwrap();
    let err = queue.enqueue("u", b"x".to_vec(), options).await.unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(_)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn retry_then_kill() {
    let queue = get_test_queue().await;
    let names = queues(&["default"]);
    queue
        .enqueue("flaky", vec![], EnqueueOptions::new().max_retries(1))
        .await
        .unwrap();

    let message = queue.dequeue(&names, Duration::ZERO).await.unwrap().unwrap();
    queue.retry(message, "first", Duration::ZERO).await.unwrap();

    let message = queue
        .dequeue(&names, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.retried, 1);
    assert_eq!(message.last_error.as_deref(), Some("first"));

    queue.kill(message, "second").await.unwrap();
    let dead = queue.dead_letters("default").await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].last_error.as_deref(), Some("second"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn in_flight_jobs_of_dead_worker_are_recovered() {
    let crashed = get_test_queue()
        .await
        .with_heartbeat_ttl(Duration::from_millis(100));
    let survivor = connect_worker().await;
    let names = queues(&["default"]);
    crashed.heartbeat().await.unwrap();
    crashed.enqueue("orphan", vec![], EnqueueOptions::new()).await.unwrap();

    // Dequeue without ack, as a crashed worker would
    let _ = crashed.dequeue(&names, Duration::ZERO).await.unwrap().unwrap();
    assert!(survivor.dequeue(&names, Duration::ZERO).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(survivor.recover_in_flight(&names).await.unwrap(), 1);
    let message = survivor.dequeue(&names, Duration::ZERO).await.unwrap();
    assert_eq!(message.unwrap().task_type, "orphan");
    assert_eq!(survivor.recover_in_flight(&names).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn live_worker_keeps_its_in_flight_jobs() {
    let busy = get_test_queue().await;
    let starting = connect_worker().await;
    let names = queues(&["default"]);
    busy.heartbeat().await.unwrap();
    busy.enqueue("long", vec![], EnqueueOptions::new()).await.unwrap();
    let message = busy.dequeue(&names, Duration::ZERO).await.unwrap().unwrap();

    starting.heartbeat().await.unwrap();
    assert_eq!(starting.recover_in_flight(&names).await.unwrap(), 0);
    assert!(starting.dequeue(&names, Duration::ZERO).await.unwrap().is_none());

    busy.ack(&message).await.unwrap();
    assert_eq!(busy.pending_count("default").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn undecodable_job_is_dead_lettered() {
    let queue = get_test_queue().await;
    let names = queues(&["default"]);

    let info = get_container_info().await;
    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("LPUSH")
        .arg("jobs:queue:default")
        .arg("{not a job")
        .query_async(&mut conn)
        .await
        .unwrap();
    queue.enqueue("valid", vec![], EnqueueOptions::new()).await.unwrap();

    assert!(queue.dequeue(&names, Duration::ZERO).await.unwrap().is_none());
    assert_eq!(queue.dead_count("default").await.unwrap(), 1);
    assert!(queue.dead_letters("default").await.unwrap().is_empty());

    let active: usize = redis::cmd("LLEN")
        .arg(format!("jobs:active:default:{}", queue.worker_id()))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(active, 0);

    let message = queue.dequeue(&names, Duration::ZERO).await.unwrap();
    assert_eq!(message.unwrap().task_type, "valid");
}
