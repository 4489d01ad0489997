use async_trait::async_trait;
use common::{InventoryId, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{CatalogStore, MigrateError, StoreResult};
use crate::error::StoreError;
use crate::model::{
    InventoryRecord, Money, NewInventory, NewProduct, Order, OrderDraft, OrderItem, OrderStatus,
    Product,
};

/// PostgreSQL-backed catalog store.
#[derive(Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: &PgRow) -> StoreResult<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            sku: row.try_get("sku")?,
            price: Money::from_cents(row.try_get("price_cents")?),
        })
    }

    fn row_to_inventory(row: &PgRow) -> StoreResult<InventoryRecord> {
        Ok(InventoryRecord {
            id: InventoryId::new(row.try_get("id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            reorder_point: row.try_get("reorder_point")?,
            location: row.try_get("location")?,
        })
    }

    fn row_to_item(row: &PgRow) -> StoreResult<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidData(format!("order item quantity {quantity}")))?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> StoreResult<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            user_id: row.try_get("user_id")?,
            status: status.parse().map_err(StoreError::InvalidData)?,
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            shipping_address: row.try_get("shipping_address")?,
            billing_address: row.try_get("billing_address")?,
            tracking_number: row.try_get("tracking_number")?,
            notes: row.try_get("notes")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn raw_ids(ids: &[ProductId]) -> Vec<i64> {
    ids.iter().map(ProductId::as_i64).collect()
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn create_product(&self, product: NewProduct) -> StoreResult<Product> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (name, sku, price_cents)
            VALUES ($1, $2, $3)
            RETURNING id, name, sku, price_cents
            "#,
        )
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.price.cents())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(&row)
    }

    async fn find_products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, sku, price_cents
            FROM products
            WHERE id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(raw_ids(ids))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_product).collect()
    }

    async fn create_inventory(&self, inventory: NewInventory) -> StoreResult<InventoryRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventories (product_id, quantity, reorder_point, location)
            VALUES ($1, $2, $3, $4)
            RETURNING id, product_id, quantity, reorder_point, location
            "#,
        )
        .bind(inventory.product_id.as_i64())
        .bind(inventory.quantity)
        .bind(inventory.reorder_point)
        .bind(&inventory.location)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::NotFound {
                    entity: "product",
                    id: inventory.product_id.as_i64(),
                };
            }
            StoreError::Database(e)
        })?;

        Self::row_to_inventory(&row)
    }

    async fn first_inventories(&self, ids: &[ProductId]) -> StoreResult<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (product_id) id, product_id, quantity, reorder_point, location
            FROM inventories
            WHERE product_id = ANY($1)
            ORDER BY product_id ASC, id ASC
            "#,
        )
        .bind(raw_ids(ids))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_inventory).collect()
    }

    async fn list_inventories(&self) -> StoreResult<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity, reorder_point, location
            FROM inventories
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_inventory).collect()
    }

    async fn update_inventory_quantity(
        &self,
        id: InventoryId,
        quantity: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE inventories SET quantity = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_i64())
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "inventory",
                id: id.as_i64(),
            });
        }
        Ok(())
    }

    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, status, total_amount_cents, shipping_address,
                                billing_address, tracking_number, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, status, total_amount_cents, shipping_address,
                      billing_address, tracking_number, notes, created_at, updated_at
            "#,
        )
        .bind(draft.user_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(draft.total_amount.cents())
        .bind(&draft.shipping_address)
        .bind(&draft.billing_address)
        .bind(&draft.tracking_number)
        .bind(&draft.notes)
        .fetch_one(&mut *tx)
        .await?;
        let order_id: i64 = row.try_get("id")?;

        for item in &draft.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                StoreError::InvalidData(format!("order item quantity {}", item.quantity))
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, unit_price_cents,
                                         total_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id)
            .bind(item.product_id.as_i64())
            .bind(quantity)
            .bind(item.unit_price.cents())
            .bind(item.total_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Self::row_to_order(&row, draft.items)
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, total_amount_cents, shipping_address,
                   billing_address, tracking_number, notes, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            r#"
            SELECT product_id, quantity, unit_price_cents, total_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let items = item_rows
            .iter()
            .map(Self::row_to_item)
            .collect::<StoreResult<Vec<_>>>()?;
        Self::row_to_order(&row, items).map(Some)
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_i64())
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "order",
                id: id.as_i64(),
            });
        }
        Ok(())
    }
}
