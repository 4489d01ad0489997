//! Periodic inventory reconciliation.

use std::time::Duration;

use orders::InventoryService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns a task that copies every inventory counter back onto its durable
/// record each `period`, until `shutdown` flips to true. The first run
/// happens one period after start.
pub fn spawn_inventory_sync(
    inventory: InventoryService,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "Inventory reconciliation scheduled");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = inventory.sync_all().await {
                        tracing::error!(error = %e.detail(), "Inventory reconciliation failed");
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::debug!("Inventory reconciliation stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kv_store::{InMemoryKeyValueStore, KeyValueStore};
    use orders::{CatalogStore, InMemoryCatalogStore, Money, NewInventory, NewProduct};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sync_runs_each_period_until_shutdown() {
        let catalog = InMemoryCatalogStore::new();
        let cache = InMemoryKeyValueStore::new();
        let product = catalog
            .create_product(NewProduct {
                name: "Widget".to_string(),
                sku: "W-1".to_string(),
                price: Money::from_cents(100),
            })
            .await
            .unwrap();
        let record = catalog
            .create_inventory(NewInventory {
                product_id: product.id,
                quantity: 10,
                reorder_point: 0,
                location: "main".to_string(),
            })
            .await
            .unwrap();
        cache.set(&record.cache_key(), "6", None).await.unwrap();

        let inventory = InventoryService::new(Arc::new(catalog.clone()), Arc::new(cache.clone()));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_inventory_sync(inventory, Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(catalog.inventory_quantity(record.id).await, Some(10));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(catalog.inventory_quantity(record.id).await, Some(6));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
