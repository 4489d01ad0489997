//! Order placement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chain::{Chain, ChainId, ChainOptions};
use common::ProductId;
use job_queue::JobQueue;

use crate::error::{OrderError, Result};
use crate::model::{NewOrder, Order, OrderDraft, OrderItem, new_tracking_number};
use crate::store::CatalogStore;
use crate::tasks::{InventoryCheck, ProcessPayment, ReleaseOrder, SendNotification, queues};

/// Policy of the order-processing chain.
pub fn order_chain_options() -> ChainOptions {
    ChainOptions {
        queue: queues::ORDER_PROCESSING_CHAIN.to_string(),
        max_retries: 3,
        timeout: Duration::from_secs(3 * 60),
    }
}

/// An order that was persisted and whose processing chain was dispatched.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub chain_id: ChainId,
}

/// Entry point for creating orders.
#[derive(Clone)]
pub struct OrderService {
    catalog: Arc<dyn CatalogStore>,
    queue: Arc<dyn JobQueue>,
}

impl OrderService {
    pub fn new(catalog: Arc<dyn CatalogStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { catalog, queue }
    }

    /// Validates and prices `request`, stores it as a pending order and
    /// dispatches the chain that reserves stock and takes payment.
    ///
    /// Returns once the chain is queued. Stock and payment failures surface
    /// later through the order status, not here.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = request.user_id, order_id = tracing::field::Empty)
    )]
    pub async fn place_order(&self, request: NewOrder) -> Result<PlacedOrder> {
        validate_request(&request)?;

        let product_ids: Vec<ProductId> = request.items.iter().map(|i| i.product_id).collect();
        let prices: HashMap<ProductId, _> = self
            .catalog
            .find_products(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p.price))
            .collect();

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let Some(price) = prices.get(&line.product_id) else {
                return Err(OrderError::validation(
                    "items",
                    format!("Product with ID {} does not exist", line.product_id),
                ));
            };
            items.push(OrderItem::new(line.product_id, line.quantity, *price));
        }

        let order = self
            .catalog
            .create_order(OrderDraft {
                user_id: request.user_id,
                total_amount: items.iter().map(|i| i.total_price).sum(),
                shipping_address: request.shipping_address,
                billing_address: request.billing_address,
                tracking_number: new_tracking_number(),
                notes: request.notes,
                items,
            })
            .await?;
        tracing::Span::current().record("order_id", order.id.as_i64());

        let dispatched = Chain::with_options(self.queue.clone(), order_chain_options())
            .then(InventoryCheck { order_id: order.id })
            .then(ProcessPayment { order_id: order.id })
            .on_success(SendNotification::order_created(
                order.user_id,
                order.id,
                &order.tracking_number,
            ))
            .on_failure(ReleaseOrder { order_id: order.id })
            .dispatch()
            .await
            .map_err(|e| OrderError::server("Failed to process the order", e.to_string()))?;

        tracing::info!(
            chain_id = %dispatched.chain_id,
            total = %order.total_amount,
            "Order placed"
        );
        Ok(PlacedOrder {
            order,
            chain_id: dispatched.chain_id,
        })
    }
}

fn validate_request(request: &NewOrder) -> Result<()> {
    let mut fields = BTreeMap::new();
    if request.items.is_empty() {
        fields.insert(
            "items".to_string(),
            "Order must contain at least one item".to_string(),
        );
    } else if let Some(line) = request.items.iter().find(|line| line.quantity == 0) {
        fields.insert(
            "items".to_string(),
            format!("Quantity for product {} must be at least 1", line.product_id),
        );
    }
    if request.shipping_address.trim().is_empty() {
        fields.insert(
            "shipping_address".to_string(),
            "Shipping address is required".to_string(),
        );
    }
    if request.billing_address.trim().is_empty() {
        fields.insert(
            "billing_address".to_string(),
            "Billing address is required".to_string(),
        );
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(OrderError::Validation { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LineItemRequest;

    fn request(items: Vec<LineItemRequest>) -> NewOrder {
        NewOrder {
            user_id: 1,
            items,
            shipping_address: "1 Main St".to_string(),
            billing_address: "1 Main St".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_empty_order_is_rejected() {
        let err = validate_request(&request(vec![])).unwrap_err();
        assert_eq!(
            err.fields().unwrap().get("items").unwrap(),
            "Order must contain at least one item"
        );
    }

    #[test]
    fn test_zero_quantity_and_missing_addresses() {
        let mut req = request(vec![LineItemRequest {
            product_id: ProductId::new(4),
            quantity: 0,
        }]);
        req.billing_address = "  ".to_string();

        let err = validate_request(&req).unwrap_err();
        let fields = err.fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains_key("items"));
        assert!(fields.contains_key("billing_address"));
    }

    #[test]
    fn test_chain_policy() {
        let options = order_chain_options();
        assert_eq!(options.queue, "order_processing_chain");
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.timeout, Duration::from_secs(180));
    }
}
