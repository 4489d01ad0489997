use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{InventoryId, OrderId, ProductId};
use tokio::sync::RwLock;

use super::{CatalogStore, StoreResult};
use crate::error::StoreError;
use crate::model::{
    InventoryRecord, NewInventory, NewProduct, Order, OrderDraft, OrderStatus, Product,
};

#[derive(Debug, Default)]
struct CatalogState {
    products: BTreeMap<ProductId, Product>,
    inventories: BTreeMap<InventoryId, InventoryRecord>,
    orders: BTreeMap<OrderId, Order>,
    next_id: i64,
    unavailable: bool,
    failing_status_updates: usize,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable(
                "in-memory catalog marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory catalog store for tests and database-less runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes the next `count` order status updates fail with
    /// `StoreError::Unavailable` while every other call keeps working.
    pub async fn fail_status_updates(&self, count: usize) {
        self.state.write().await.failing_status_updates = count;
    }

    /// Current stored quantity of an inventory record.
    pub async fn inventory_quantity(&self, id: InventoryId) -> Option<i64> {
        self.state
            .read()
            .await
            .inventories
            .get(&id)
            .map(|record| record.quantity)
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn create_product(&self, product: NewProduct) -> StoreResult<Product> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let product = Product {
            id: ProductId::new(state.next_id()),
            name: product.name,
            sku: product.sku,
            price: product.price,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn find_products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let state = self.state.read().await;
        state.check_available()?;

        Ok(state
            .products
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn create_inventory(&self, inventory: NewInventory) -> StoreResult<InventoryRecord> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if !state.products.contains_key(&inventory.product_id) {
            return Err(StoreError::NotFound {
                entity: "product",
                id: inventory.product_id.as_i64(),
            });
        }
        let record = InventoryRecord {
            id: InventoryId::new(state.next_id()),
            product_id: inventory.product_id,
            quantity: inventory.quantity,
            reorder_point: inventory.reorder_point,
            location: inventory.location,
        };
        state.inventories.insert(record.id, record.clone());
        Ok(record)
    }

    async fn first_inventories(&self, ids: &[ProductId]) -> StoreResult<Vec<InventoryRecord>> {
        let state = self.state.read().await;
        state.check_available()?;

        let mut first: BTreeMap<ProductId, &InventoryRecord> = BTreeMap::new();
        for record in state.inventories.values() {
            if ids.contains(&record.product_id) {
                first.entry(record.product_id).or_insert(record);
            }
        }
        Ok(first.into_values().cloned().collect())
    }

    async fn list_inventories(&self) -> StoreResult<Vec<InventoryRecord>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.inventories.values().cloned().collect())
    }

    async fn update_inventory_quantity(
        &self,
        id: InventoryId,
        quantity: i64,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let record = state.inventories.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "inventory",
            id: id.as_i64(),
        })?;
        record.quantity = quantity;
        Ok(())
    }

    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(state.next_id()),
            user_id: draft.user_id,
            status: OrderStatus::Pending,
            total_amount: draft.total_amount,
            shipping_address: draft.shipping_address,
            billing_address: draft.billing_address,
            tracking_number: draft.tracking_number,
            notes: draft.notes,
            items: draft.items,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if state.failing_status_updates > 0 {
            state.failing_status_updates -= 1;
            return Err(StoreError::Unavailable(
                "order status update failed".to_string(),
            ));
        }

        let order = state.orders.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "order",
            id: id.as_i64(),
        })?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Money, OrderItem};

    async fn seed_product(store: &InMemoryCatalogStore, sku: &str) -> Product {
        store
            .create_product(NewProduct {
                name: format!("Product {sku}"),
                sku: sku.to_string(),
                price: Money::from_cents(1000),
            })
            .await
            .unwrap()
    }

    fn inventory(product_id: ProductId, quantity: i64) -> NewInventory {
        NewInventory {
            product_id,
            quantity,
            reorder_point: 2,
            location: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_inventory_wins() {
        let store = InMemoryCatalogStore::new();
        let product = seed_product(&store, "A").await;
        let first = store.create_inventory(inventory(product.id, 5)).await.unwrap();
        store.create_inventory(inventory(product.id, 9)).await.unwrap();

        let records = store.first_inventories(&[product.id]).await.unwrap();
        assert_eq!(records, vec![first]);
    }

    #[tokio::test]
    async fn test_find_products_skips_missing() {
        let store = InMemoryCatalogStore::new();
        let product = seed_product(&store, "A").await;

        let found = store
            .find_products(&[product.id, ProductId::new(999)])
            .await
            .unwrap();
        assert_eq!(found, vec![product]);
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let store = InMemoryCatalogStore::new();
        let product = seed_product(&store, "A").await;
        let order = store
            .create_order(OrderDraft {
                user_id: 1,
                total_amount: Money::from_cents(2000),
                shipping_address: "1 Main St".to_string(),
                billing_address: "1 Main St".to_string(),
                tracking_number: "TRN_00000001".to_string(),
                notes: None,
                items: vec![OrderItem::new(product.id, 2, product.price)],
            })
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        store
            .update_order_status(order.id, OrderStatus::Reserved)
            .await
            .unwrap();
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Reserved);
        assert_eq!(stored.items.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_records() {
        let store = InMemoryCatalogStore::new();
        assert!(matches!(
            store
                .update_order_status(OrderId::new(1), OrderStatus::Paid)
                .await,
            Err(StoreError::NotFound { entity: "order", .. })
        ));
        assert!(matches!(
            store.update_inventory_quantity(InventoryId::new(1), 3).await,
            Err(StoreError::NotFound {
                entity: "inventory",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryCatalogStore::new();
        store.set_unavailable(true).await;
        assert!(matches!(
            store.list_inventories().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
