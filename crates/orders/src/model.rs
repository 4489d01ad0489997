//! Catalog and order model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{InventoryId, OrderId, ProductId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Money amount represented in minor units (cents) to avoid floating point
/// issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Price of `quantity` units at this unit price.
    pub fn times(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub price: Money,
}

/// Input for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub price: Money,
}

/// Durable stock record for a product at one location.
///
/// `quantity` is the baseline used to seed the inventory counter cache; it
/// only catches up with reservations when reconciliation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub reorder_point: i64,
    pub location: String,
}

impl InventoryRecord {
    /// Key of this record's counter in the key-value store.
    pub fn cache_key(&self) -> String {
        format!("product:{}:inventory:{}", self.product_id, self.id)
    }

    pub fn needs_restock(&self) -> bool {
        self.quantity <= self.reorder_point
    }
}

/// Input for creating an inventory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInventory {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reorder_point: i64,
    pub location: String,
}

/// Lifecycle of an order while its processing chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    /// Stock has been taken from the inventory counters.
    Reserved,
    Paid,
    /// The chain gave up; any reserved stock has been released.
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Reserved => "reserved",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "reserved" => Ok(OrderStatus::Reserved),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// A priced line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            total_price: unit_price.times(quantity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub shipping_address: String,
    pub billing_address: String,
    pub tracking_number: String,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Requested quantity per product, summed over all lines.
    pub fn quantities_by_product(&self) -> BTreeMap<ProductId, i64> {
        let mut quantities = BTreeMap::new();
        for item in &self.items {
            *quantities.entry(item.product_id).or_insert(0) += i64::from(item.quantity);
        }
        quantities
    }

    /// Key marking that this order currently holds reserved stock.
    pub fn reservation_key(&self) -> String {
        format!("order:{}:reservation", self.id)
    }
}

/// A priced order ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: i64,
    pub total_amount: Money,
    pub shipping_address: String,
    pub billing_address: String,
    pub tracking_number: String,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
}

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Create-order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: i64,
    pub items: Vec<LineItemRequest>,
    pub shipping_address: String,
    pub billing_address: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Generates a shipment tracking number of the form `TRN_XXXXXXXX`.
pub fn new_tracking_number() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TRN_{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_order_item_total() {
        let item = OrderItem::new(ProductId::new(1), 3, Money::from_cents(250));
        assert_eq!(item.total_price, Money::from_cents(750));
    }

    #[test]
    fn test_cache_key_and_restock() {
        let record = InventoryRecord {
            id: InventoryId::new(4),
            product_id: ProductId::new(7),
            quantity: 5,
            reorder_point: 5,
            location: "main".to_string(),
        };
        assert_eq!(record.cache_key(), "product:7:inventory:4");
        assert!(record.needs_restock());
    }

    #[test]
    fn test_quantities_are_summed_per_product() {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(1),
            user_id: 1,
            status: OrderStatus::Pending,
            total_amount: Money::zero(),
            shipping_address: String::new(),
            billing_address: String::new(),
            tracking_number: new_tracking_number(),
            notes: None,
            items: vec![
                OrderItem::new(ProductId::new(2), 1, Money::zero()),
                OrderItem::new(ProductId::new(1), 2, Money::zero()),
                OrderItem::new(ProductId::new(2), 3, Money::zero()),
            ],
            created_at: now,
            updated_at: now,
        };
        let quantities = order.quantities_by_product();
        assert_eq!(
            quantities.into_iter().collect::<Vec<_>>(),
            vec![(ProductId::new(1), 2), (ProductId::new(2), 4)]
        );
    }

    #[test]
    fn test_tracking_number_format() {
        let tracking = new_tracking_number();
        assert!(tracking.starts_with("TRN_"));
        assert_eq!(tracking.len(), 12);
        assert_eq!(tracking, tracking.to_uppercase());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Reserved,
            OrderStatus::Paid,
            OrderStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }
}
