//! Inventory reservation against the key-value counter cache.
//!
//! Each product's first inventory record owns a counter in the key-value
//! store. The counter is seeded from the record's durable quantity the first
//! time it is needed and from then on is the source of truth for available
//! stock. Reservations for all products of an order go through one
//! server-side script so that either every counter is decremented or none
//! is. The same script sets a per-order marker, and releasing the order
//! clears it while giving the stock back, so redelivered reservations and
//! releases change the counters only once. Reconciliation copies counters
//! back onto the durable records.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::ProductId;
use kv_store::{KeyValueStore, ReservationOutcome};

use crate::error::{OrderError, Result};
use crate::model::{InventoryRecord, Order};
use crate::store::CatalogStore;

/// Reserves, restores and reconciles stock for orders.
#[derive(Clone)]
pub struct InventoryService {
    catalog: Arc<dyn CatalogStore>,
    cache: Arc<dyn KeyValueStore>,
}

impl InventoryService {
    pub fn new(catalog: Arc<dyn CatalogStore>, cache: Arc<dyn KeyValueStore>) -> Self {
        Self { catalog, cache }
    }

    /// Reserves stock for every line of `order` as one all-or-nothing
    /// operation.
    ///
    /// Returns a validation error when any product is short, and a server
    /// error when the cache cannot be reached. Neither modifies a counter.
    /// Calling it again for an order that already holds its stock succeeds
    /// without taking more.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn reserve_for_order(&self, order: &Order) -> Result<()> {
        let quantities = order.quantities_by_product();
        let records = self.records_for(&quantities).await?;

        let result = self
            .reserve(&order.reservation_key(), &records, &quantities)
            .await;
        let outcome = match &result {
            Ok(()) => "reserved",
            Err(OrderError::Validation { .. }) => "insufficient",
            Err(_) => "error",
        };
        metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn reserve(
        &self,
        marker: &str,
        records: &BTreeMap<ProductId, InventoryRecord>,
        quantities: &BTreeMap<ProductId, i64>,
    ) -> Result<()> {
        for record in records.values() {
            self.seed(record).await?;
        }

        let (keys, amounts) = counter_amounts(records, quantities);
        match self.cache.reserve_all_once(marker, &keys, &amounts).await? {
            ReservationOutcome::Reserved => {
                tracing::info!(products = keys.len(), "Inventory reserved");
                Ok(())
            }
            ReservationOutcome::AlreadyReserved => {
                tracing::info!("Inventory already reserved for this order");
                Ok(())
            }
            ReservationOutcome::Insufficient => {
                let message = match self.first_short(records, quantities).await {
                    Some(product_id) => format!("Insufficient stock for product {product_id}"),
                    None => "Insufficient stock for one or more products".to_string(),
                };
                tracing::info!(reason = %message, "Inventory reservation rejected");
                Err(OrderError::validation("inventory", message))
            }
        }
    }

    /// Seeds the counter for `record` from its durable quantity unless the
    /// counter already exists. Returns true if this call wrote it.
    pub async fn seed(&self, record: &InventoryRecord) -> Result<bool> {
        let key = record.cache_key();
        let seeded = self
            .cache
            .set_if_absent(&key, &record.quantity.to_string(), None)
            .await?;
        if seeded {
            tracing::debug!(key = %key, quantity = record.quantity, "Inventory counter seeded");
        }
        Ok(seeded)
    }

    /// Returns `quantity` units of `product_id` to its counter.
    ///
    /// Not atomic with the reservation it undoes.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self, product_id: ProductId, quantity: i64) -> Result<i64> {
        let record = self
            .catalog
            .first_inventories(&[product_id])
            .await?
            .into_iter()
            .next()
            .ok_or(OrderError::ProductNotFound(product_id))?;

        let remaining = self.cache.incr_by(&record.cache_key(), quantity).await?;
        metrics::counter!("inventory_restores_total").increment(1);
        tracing::info!(remaining, "Inventory restored");
        Ok(remaining)
    }

    /// Gives back the stock held by `order`, in one atomic step with
    /// clearing its reservation marker.
    ///
    /// Returns false and changes nothing when the order holds no
    /// reservation, either because none was taken or because it was already
    /// released.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn restore_order(&self, order: &Order) -> Result<bool> {
        let quantities = order.quantities_by_product();
        let records = self.records_for(&quantities).await?;
        let (keys, amounts) = counter_amounts(&records, &quantities);

        let released = self
            .cache
            .release_all(&order.reservation_key(), &keys, &amounts)
            .await?;
        if released {
            metrics::counter!("inventory_restores_total").increment(1);
            tracing::info!(products = keys.len(), "Inventory restored");
        } else {
            tracing::info!("No reservation held, nothing to restore");
        }
        Ok(released)
    }

    /// Current counter value for a product, if the counter exists.
    pub async fn available(&self, product_id: ProductId) -> Result<Option<i64>> {
        let records = self.catalog.first_inventories(&[product_id]).await?;
        match records.first() {
            Some(record) => Ok(self.cache.get_int(&record.cache_key()).await?),
            None => Err(OrderError::ProductNotFound(product_id)),
        }
    }

    /// Overwrites the durable quantity of `record` with its counter value.
    ///
    /// Last write wins. Returns the synced quantity, or `None` when no
    /// counter has been seeded for the record yet.
    #[tracing::instrument(skip(self, record), fields(inventory_id = %record.id, product_id = %record.product_id))]
    pub async fn sync_to_db(&self, record: &InventoryRecord) -> Result<Option<i64>> {
        let Some(quantity) = self.cache.get_int(&record.cache_key()).await? else {
            tracing::debug!("No counter to sync");
            return Ok(None);
        };

        self.catalog
            .update_inventory_quantity(record.id, quantity)
            .await?;
        metrics::counter!("inventory_syncs_total").increment(1);
        tracing::debug!(quantity, "Inventory synced");
        Ok(Some(quantity))
    }

    /// Runs [`sync_to_db`](Self::sync_to_db) for every inventory record.
    ///
    /// A failing record is logged and skipped. Returns how many records were
    /// updated.
    #[tracing::instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<usize> {
        let records = self.catalog.list_inventories().await?;
        let mut synced = 0;
        for record in &records {
            match self.sync_to_db(record).await {
                Ok(Some(_)) => synced += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    inventory_id = %record.id,
                    error = %e.detail(),
                    "Inventory sync failed"
                ),
            }
        }
        tracing::info!(synced, total = records.len(), "Inventory reconciliation finished");
        Ok(synced)
    }

    async fn records_for(
        &self,
        quantities: &BTreeMap<ProductId, i64>,
    ) -> Result<BTreeMap<ProductId, InventoryRecord>> {
        let ids: Vec<ProductId> = quantities.keys().copied().collect();
        let records: BTreeMap<ProductId, InventoryRecord> = self
            .catalog
            .first_inventories(&ids)
            .await?
            .into_iter()
            .map(|record| (record.product_id, record))
            .collect();

        if let Some(missing) = ids.iter().find(|id| !records.contains_key(id)) {
            return Err(OrderError::ProductNotFound(*missing));
        }
        Ok(records)
    }

    /// Best-effort lookup of a product whose counter cannot cover its
    /// quantity. Read after the script ran, so it may miss under contention.
    async fn first_short(
        &self,
        records: &BTreeMap<ProductId, InventoryRecord>,
        quantities: &BTreeMap<ProductId, i64>,
    ) -> Option<ProductId> {
        for (product_id, quantity) in quantities {
            let record = records.get(product_id)?;
            match self.cache.get_int(&record.cache_key()).await {
                Ok(Some(available)) if available >= *quantity => continue,
                Ok(_) => return Some(*product_id),
                Err(_) => return None,
            }
        }
        None
    }
}

/// Counter keys and amounts, in product order.
fn counter_amounts(
    records: &BTreeMap<ProductId, InventoryRecord>,
    quantities: &BTreeMap<ProductId, i64>,
) -> (Vec<String>, Vec<i64>) {
    quantities
        .iter()
        .filter_map(|(product_id, quantity)| {
            records
                .get(product_id)
                .map(|record| (record.cache_key(), *quantity))
        })
        .unzip()
}
