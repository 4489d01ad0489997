//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{OrderError, Result};
use crate::model::Money;

/// Result of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub order_id: OrderId,
    pub amount: Money,
}

/// Charges customers for orders.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` for `order_id`.
    ///
    /// Charging the same order twice returns the first receipt, so a
    /// redelivered payment step does not double-charge.
    async fn charge(&self, order_id: OrderId, amount: Money) -> Result<PaymentReceipt>;
}

#[derive(Debug, Default)]
struct GatewayState {
    receipts: HashMap<OrderId, PaymentReceipt>,
    next_id: u32,
    decline: bool,
    outages: u32,
}

/// In-memory payment gateway.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every charge fail with a declined card until reset.
    pub async fn set_decline(&self, decline: bool) {
        self.state.write().await.decline = decline;
    }

    /// Makes the next `count` charges fail as if the gateway were down.
    pub async fn fail_next(&self, count: u32) {
        self.state.write().await.outages = count;
    }

    pub async fn charge_count(&self) -> usize {
        self.state.read().await.receipts.len()
    }

    pub async fn receipt(&self, order_id: OrderId) -> Option<PaymentReceipt> {
        self.state.read().await.receipts.get(&order_id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, order_id: OrderId, amount: Money) -> Result<PaymentReceipt> {
        let mut state = self.state.write().await;

        if let Some(receipt) = state.receipts.get(&order_id) {
            return Ok(receipt.clone());
        }
        if state.outages > 0 {
            state.outages -= 1;
            return Err(OrderError::server(
                "Payment gateway unavailable",
                format!("simulated outage while charging order {order_id}"),
            ));
        }
        if state.decline {
            return Err(OrderError::PaymentDeclined(format!(
                "card declined for order {order_id}"
            )));
        }
        if !amount.is_positive() {
            return Err(OrderError::validation(
                "amount",
                format!("Charge amount must be positive, got {amount}"),
            ));
        }

        state.next_id += 1;
        let receipt = PaymentReceipt {
            transaction_id: format!("PAY-{:04}", state.next_id),
            order_id,
            amount,
        };
        state.receipts.insert(order_id, receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use chain::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn test_charge_is_idempotent_per_order() {
        let gateway = InMemoryPaymentGateway::new();
        let order_id = OrderId::new(1);

        let first = gateway
            .charge(order_id, Money::from_cents(5000))
            .await
            .unwrap();
        let second = gateway
            .charge(order_id, Money::from_cents(5000))
            .await
            .unwrap();

        assert_eq!(first.transaction_id, "PAY-0001");
        assert_eq!(first, second);
        assert_eq!(gateway.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_decline_is_validation_class() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline(true).await;

        let err = gateway
            .charge(OrderId::new(1), Money::from_cents(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(gateway.charge_count().await, 0);
    }

    #[tokio::test]
    async fn test_outage_is_server_class_and_transient() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.fail_next(1).await;

        let err = gateway
            .charge(OrderId::new(1), Money::from_cents(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);

        gateway
            .charge(OrderId::new(1), Money::from_cents(100))
            .await
            .unwrap();
        assert!(gateway.receipt(OrderId::new(1)).await.is_some());
    }
}
