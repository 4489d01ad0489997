//! Task payloads of the order-processing chain.

use chain::{Task, enqueue_task};
use common::OrderId;
use job_queue::{EnqueueOptions, JobInfo, JobQueue};
use serde::{Deserialize, Serialize};

/// Queue names used by the order workflow.
pub mod queues {
    pub const ORDER_PROCESSING_CHAIN: &str = "order_processing_chain";
    pub const CRITICAL: &str = "critical";
    pub const DEFAULT: &str = "default";
    pub const PAYMENTS: &str = "payments";
    pub const INVENTORY_CHECK: &str = "inventory_check";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const LOW: &str = "low";

    /// Every queue, highest priority first.
    pub const ALL: [&str; 7] = [
        ORDER_PROCESSING_CHAIN,
        CRITICAL,
        DEFAULT,
        PAYMENTS,
        INVENTORY_CHECK,
        NOTIFICATIONS,
        LOW,
    ];
}

/// Reserves stock for every line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCheck {
    pub order_id: OrderId,
}

impl Task for InventoryCheck {
    const TYPE: &'static str = "inventory:check";
}

/// Charges the order total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPayment {
    pub order_id: OrderId,
}

impl Task for ProcessPayment {
    const TYPE: &'static str = "process:payment";
}

/// Releases reserved stock and marks the order failed. Runs as the failure
/// callback of the order chain, wrapped in a `ChainFailure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOrder {
    pub order_id: OrderId,
}

impl Task for ReleaseOrder {
    const TYPE: &'static str = "order:release";
}

/// A notification for a user or another notifiable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendNotification {
    pub notification_type: String,
    pub notifiable_type: String,
    pub notifiable_id: i64,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    pub channel: String,
}

impl Task for SendNotification {
    const TYPE: &'static str = "send:notification";
}

impl SendNotification {
    pub const CHANNEL_DATABASE: &'static str = "database";

    /// Notification telling a user their order was processed.
    pub fn order_created(user_id: i64, order_id: OrderId, tracking_number: &str) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("order_id".to_string(), order_id.as_i64().into());
        data.insert("tracking_number".to_string(), tracking_number.into());
        Self {
            notification_type: "order_created".to_string(),
            notifiable_type: "user".to_string(),
            notifiable_id: user_id,
            data,
            channel: Self::CHANNEL_DATABASE.to_string(),
        }
    }
}

/// Enqueues a notification on the notifications queue.
pub async fn enqueue_notification(
    queue: &dyn JobQueue,
    notification: &SendNotification,
) -> chain::Result<JobInfo> {
    enqueue_task(
        queue,
        notification,
        EnqueueOptions::default()
            .queue(queues::NOTIFICATIONS)
            .max_retries(3),
    )
    .await
}
