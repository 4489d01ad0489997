//! Order-processing application.
//!
//! [`OrderService::place_order`] stores a pending order and dispatches the
//! chain `inventory:check -> process:payment`. The chain's success callback
//! sends the order-created notification; its failure callback releases any
//! reserved stock and marks the order failed. Stock is reserved through
//! [`InventoryService`], which runs one atomic script over every product
//! counter of the order.

pub mod error;
pub mod handlers;
pub mod inventory;
pub mod model;
pub mod payment;
pub mod service;
pub mod store;
pub mod tasks;

pub use common::{InventoryId, OrderId, ProductId};
pub use error::{OrderError, Result, StoreError};
pub use handlers::{
    InventoryCheckHandler, NotificationOutbox, OrderHandlers, ProcessPaymentHandler,
    ReleaseOrderHandler, SendNotificationHandler,
};
pub use inventory::InventoryService;
pub use model::{
    InventoryRecord, LineItemRequest, Money, NewInventory, NewOrder, NewProduct, Order,
    OrderDraft, OrderItem, OrderStatus, Product,
};
pub use payment::{InMemoryPaymentGateway, PaymentGateway, PaymentReceipt};
pub use service::{OrderService, PlacedOrder, order_chain_options};
pub use store::{
    CatalogStore, InMemoryCatalogStore, MigrateError, PostgresCatalogStore, StoreResult,
};
pub use tasks::{
    InventoryCheck, ProcessPayment, ReleaseOrder, SendNotification, enqueue_notification, queues,
};
