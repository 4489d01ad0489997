//! Handlers for the order-processing tasks.
//!
//! Every handler re-reads the order and checks its status first, so a
//! redelivered message for a step that already took effect is a no-op.
//! Stock changes do not rely on the status alone: the reservation marker
//! kept by [`InventoryService`] makes them apply once even when the status
//! write after them failed.

use std::sync::Arc;

use async_trait::async_trait;
use chain::{ChainFailure, Handler, HandlerRegistry, JobContext, TaskError};
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{OrderError, Result};
use crate::inventory::InventoryService;
use crate::model::{Order, OrderStatus};
use crate::payment::PaymentGateway;
use crate::store::CatalogStore;
use crate::tasks::{InventoryCheck, ProcessPayment, ReleaseOrder, SendNotification};

async fn load_order(catalog: &dyn CatalogStore, order_id: OrderId) -> Result<Order> {
    catalog
        .get_order(order_id)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))
}

/// Handles `inventory:check`: reserves stock and marks the order reserved.
pub struct InventoryCheckHandler {
    catalog: Arc<dyn CatalogStore>,
    inventory: InventoryService,
}

impl InventoryCheckHandler {
    pub fn new(catalog: Arc<dyn CatalogStore>, inventory: InventoryService) -> Self {
        Self { catalog, inventory }
    }

    async fn reserve(&self, order_id: OrderId) -> Result<()> {
        let order = load_order(self.catalog.as_ref(), order_id).await?;
        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Reserved | OrderStatus::Paid => {
                tracing::info!(status = %order.status, "Stock already reserved, skipping");
                return Ok(());
            }
            OrderStatus::Failed => {
                return Err(OrderError::validation(
                    "status",
                    format!("Order {order_id} has already failed"),
                ));
            }
        }

        self.inventory.reserve_for_order(&order).await?;
        self.catalog
            .update_order_status(order_id, OrderStatus::Reserved)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<InventoryCheck> for InventoryCheckHandler {
    #[tracing::instrument(skip(self, _ctx, task), fields(order_id = %task.order_id))]
    async fn handle(
        &self,
        _ctx: &JobContext,
        task: InventoryCheck,
    ) -> std::result::Result<(), TaskError> {
        self.reserve(task.order_id).await.map_err(TaskError::from)
    }
}

/// Handles `process:payment`: charges the order total and marks it paid.
pub struct ProcessPaymentHandler {
    catalog: Arc<dyn CatalogStore>,
    payments: Arc<dyn PaymentGateway>,
}

impl ProcessPaymentHandler {
    pub fn new(catalog: Arc<dyn CatalogStore>, payments: Arc<dyn PaymentGateway>) -> Self {
        Self { catalog, payments }
    }

    async fn pay(&self, order_id: OrderId) -> Result<()> {
        let order = load_order(self.catalog.as_ref(), order_id).await?;
        match order.status {
            OrderStatus::Reserved => {}
            OrderStatus::Paid => {
                tracing::info!("Order already paid, skipping");
                return Ok(());
            }
            status => {
                return Err(OrderError::validation(
                    "status",
                    format!("Order {order_id} cannot be charged while {status}"),
                ));
            }
        }

        let receipt = self.payments.charge(order_id, order.total_amount).await?;
        self.catalog
            .update_order_status(order_id, OrderStatus::Paid)
            .await?;
        tracing::info!(
            transaction_id = %receipt.transaction_id,
            amount = %receipt.amount,
            "Payment processed"
        );
        Ok(())
    }
}

#[async_trait]
impl Handler<ProcessPayment> for ProcessPaymentHandler {
    #[tracing::instrument(skip(self, _ctx, task), fields(order_id = %task.order_id))]
    async fn handle(
        &self,
        _ctx: &JobContext,
        task: ProcessPayment,
    ) -> std::result::Result<(), TaskError> {
        self.pay(task.order_id).await.map_err(TaskError::from)
    }
}

/// Handles the order chain's failure callback: returns reserved stock and
/// marks the order failed.
pub struct ReleaseOrderHandler {
    catalog: Arc<dyn CatalogStore>,
    inventory: InventoryService,
}

impl ReleaseOrderHandler {
    pub fn new(catalog: Arc<dyn CatalogStore>, inventory: InventoryService) -> Self {
        Self { catalog, inventory }
    }

    async fn release(&self, order_id: OrderId) -> Result<()> {
        let order = load_order(self.catalog.as_ref(), order_id).await?;
        match order.status {
            // A pending order may still hold stock when its status update
            // failed after the reservation.
            OrderStatus::Reserved | OrderStatus::Pending => {
                self.inventory.restore_order(&order).await?;
            }
            OrderStatus::Paid => {
                tracing::warn!("Order already paid, leaving it as is");
                return Ok(());
            }
            OrderStatus::Failed => return Ok(()),
        }

        self.catalog
            .update_order_status(order_id, OrderStatus::Failed)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<ChainFailure<ReleaseOrder>> for ReleaseOrderHandler {
    #[tracing::instrument(
        skip(self, _ctx, task),
        fields(order_id = %task.callback.order_id, chain_id = %task.chain_id)
    )]
    async fn handle(
        &self,
        _ctx: &JobContext,
        task: ChainFailure<ReleaseOrder>,
    ) -> std::result::Result<(), TaskError> {
        tracing::warn!(
            failed_step = task.failed_step,
            task_type = %task.task_type,
            error = %task.error,
            "Order processing failed, releasing order"
        );
        self.release(task.callback.order_id)
            .await
            .map_err(TaskError::from)
    }
}

/// Notifications stored for the `database` channel.
#[derive(Debug, Clone, Default)]
pub struct NotificationOutbox {
    delivered: Arc<RwLock<Vec<SendNotification>>>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, notification: SendNotification) {
        self.delivered.write().await.push(notification);
    }

    pub async fn delivered(&self) -> Vec<SendNotification> {
        self.delivered.read().await.clone()
    }
}

/// Handles `send:notification`.
pub struct SendNotificationHandler {
    outbox: NotificationOutbox,
}

impl SendNotificationHandler {
    pub fn new(outbox: NotificationOutbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl Handler<SendNotification> for SendNotificationHandler {
    async fn handle(
        &self,
        _ctx: &JobContext,
        task: SendNotification,
    ) -> std::result::Result<(), TaskError> {
        if task.channel != SendNotification::CHANNEL_DATABASE {
            return Err(TaskError::validation(format!(
                "unsupported notification channel '{}'",
                task.channel
            )));
        }

        tracing::info!(
            notification_type = %task.notification_type,
            notifiable_type = %task.notifiable_type,
            notifiable_id = task.notifiable_id,
            channel = %task.channel,
            "Sending notification"
        );
        self.outbox.push(task).await;
        Ok(())
    }
}

/// Collaborators shared by the order handlers.
#[derive(Clone)]
pub struct OrderHandlers {
    pub catalog: Arc<dyn CatalogStore>,
    pub inventory: InventoryService,
    pub payments: Arc<dyn PaymentGateway>,
    pub outbox: NotificationOutbox,
}

impl OrderHandlers {
    /// Registers a handler for every order task type.
    pub fn register(&self, registry: &mut HandlerRegistry) -> chain::Result<()> {
        registry.register::<InventoryCheck, _>(InventoryCheckHandler::new(
            self.catalog.clone(),
            self.inventory.clone(),
        ))?;
        registry.register::<ProcessPayment, _>(ProcessPaymentHandler::new(
            self.catalog.clone(),
            self.payments.clone(),
        ))?;
        registry.register::<ChainFailure<ReleaseOrder>, _>(ReleaseOrderHandler::new(
            self.catalog.clone(),
            self.inventory.clone(),
        ))?;
        registry.register::<SendNotification, _>(SendNotificationHandler::new(
            self.outbox.clone(),
        ))?;
        Ok(())
    }
}
