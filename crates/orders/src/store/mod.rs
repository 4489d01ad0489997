//! Durable catalog store: products, inventory records and orders.

mod memory;
mod postgres;

pub use memory::InMemoryCatalogStore;
pub use postgres::PostgresCatalogStore;
pub use sqlx::migrate::MigrateError;

use async_trait::async_trait;
use common::{InventoryId, OrderId, ProductId};

use crate::error::StoreError;
use crate::model::{
    InventoryRecord, NewInventory, NewProduct, Order, OrderDraft, OrderStatus, Product,
};

/// Result type for catalog store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for the catalog and orders.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_product(&self, product: NewProduct) -> StoreResult<Product>;

    /// Products among `ids` that exist. Missing ids are left out.
    async fn find_products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>>;

    async fn create_inventory(&self, inventory: NewInventory) -> StoreResult<InventoryRecord>;

    /// First inventory record (lowest id) of each product among `ids` that
    /// has one.
    async fn first_inventories(&self, ids: &[ProductId]) -> StoreResult<Vec<InventoryRecord>>;

    /// Every inventory record, ordered by id.
    async fn list_inventories(&self) -> StoreResult<Vec<InventoryRecord>>;

    /// Overwrites the stored quantity of an inventory record.
    async fn update_inventory_quantity(&self, id: InventoryId, quantity: i64)
    -> StoreResult<()>;

    /// Persists an order and its items as pending.
    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order>;

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> StoreResult<()>;
}
