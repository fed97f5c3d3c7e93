//! Administrative operations.
//!
//! Seeding stock, rebuilding the existence filter, warming the cache and
//! repairing a counter after an invariant violation. None of these run on the
//! purchase path.

use crate::cache::CacheProtection;
use crate::ledger::StockLedger;
use flashsale_core::error::Result;
use flashsale_core::repository::{OrderRepository, ProductCatalog};
use flashsale_core::types::ProductId;
use std::sync::Arc;

/// Operator entry points over the runtime components.
#[derive(Clone)]
pub struct Maintenance {
    ledger: StockLedger,
    cache: CacheProtection,
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderRepository>,
}

impl Maintenance {
    /// Creates the maintenance facade.
    #[must_use]
    pub fn new(
        ledger: StockLedger,
        cache: CacheProtection,
        catalog: Arc<dyn ProductCatalog>,
        orders: Arc<dyn OrderRepository>,
    ) -> Self {
        Self {
            ledger,
            cache,
            catalog,
            orders,
        }
    }

    /// Seed or reseed a product's available quantity. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn init_stock(&self, product_id: ProductId, quantity: u64) -> Result<u64> {
        self.ledger.init_stock(product_id, quantity).await
    }

    /// Replace the existence filter with one holding exactly `product_ids`.
    pub fn rebuild_existence_filter(&self, product_ids: &[ProductId]) -> usize {
        self.cache.rebuild_filter(product_ids)
    }

    /// Rebuild the existence filter from every product in the catalogue.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the durable store fails; the old filter stays in place.
    pub async fn rebuild_filter_from_catalog(&self) -> Result<usize> {
        let ids = self.catalog.list_product_ids().await?;
        Ok(self.cache.rebuild_filter(&ids))
    }

    /// Pre-load cache entries with independently jittered TTLs.
    ///
    /// # Errors
    ///
    /// Returns `Store` if either store fails.
    pub async fn warm_cache(&self, product_ids: &[ProductId]) -> Result<usize> {
        self.cache.warm(product_ids).await
    }

    /// Recompute a counter as `baseline - committed - pending`.
    ///
    /// Returns `None` when the catalogue has no baseline for the product.
    ///
    /// # Errors
    ///
    /// Returns `Store` if either store fails.
    pub async fn repair_stock(&self, product_id: ProductId) -> Result<Option<u64>> {
        let Some(baseline) = self.catalog.read_stock_baseline(product_id).await? else {
            tracing::warn!(product_id = %product_id, "No stock baseline; repair skipped");
            return Ok(None);
        };
        let committed = self.orders.committed_quantity(product_id).await?;
        self.ledger
            .repair_stock(product_id, baseline, committed)
            .await
            .map(Some)
    }
}

impl std::fmt::Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintenance").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ProductLookup};
    use crate::ledger::LedgerConfig;
    use flashsale_core::keys::KeySpace;
    use flashsale_core::repository::OrderRepository as _;
    use flashsale_core::types::{Order, Product, UserId};
    use flashsale_testing::{InMemoryDurableStore, InMemorySharedStore, ManualClock};

    fn maintenance() -> (Maintenance, Arc<InMemoryDurableStore>, Arc<InMemorySharedStore>) {
        let clock = Arc::new(ManualClock::default());
        let shared = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
        let durable = Arc::new(InMemoryDurableStore::new());
        durable.seed_products(3, 20);
        let ledger = StockLedger::new(
            shared.clone(),
            KeySpace::default(),
            clock.clone(),
            LedgerConfig::default(),
        );
        let cache = CacheProtection::new(
            shared.clone(),
            durable.clone(),
            KeySpace::default(),
            clock,
            CacheConfig::default(),
        );
        (
            Maintenance::new(ledger, cache, durable.clone(), durable.clone()),
            durable,
            shared,
        )
    }

    #[tokio::test]
    async fn filter_from_catalog_admits_only_listed_products() {
        let (maintenance, durable, _) = maintenance();
        assert_eq!(maintenance.rebuild_filter_from_catalog().await.unwrap(), 3);

        let lookup = maintenance.cache.get_product(ProductId::new(1_000)).await.unwrap();
        assert_eq!(lookup, ProductLookup::NotFound);
        assert_eq!(durable.product_queries(), 0);
    }

    #[tokio::test]
    async fn warm_then_lookups_skip_the_durable_store() {
        let (maintenance, durable, _) = maintenance();
        let ids: Vec<_> = (1..=3).map(ProductId::new).collect();
        assert_eq!(maintenance.warm_cache(&ids).await.unwrap(), 3);
        let queries = durable.product_queries();

        for id in &ids {
            let lookup = maintenance.cache.get_product(*id).await.unwrap();
            assert!(matches!(lookup, ProductLookup::Found(_)));
        }
        assert_eq!(durable.product_queries(), queries);
    }

    #[tokio::test]
    async fn repair_accounts_for_committed_orders() {
        let (maintenance, durable, shared) = maintenance();
        maintenance.init_stock(ProductId::new(1), 20).await.unwrap();
        let product = Product {
            product_id: ProductId::new(1),
            name: "Product 1".to_string(),
            price_cents: 1_000,
        };
        durable
            .insert_order(Order::pending(UserId::new(1), &product, 4, chrono::Utc::now()))
            .await
            .unwrap();
        shared
            .force_field(&KeySpace::default().stock(ProductId::new(1)), "available", "-3")
            .unwrap();

        let repaired = maintenance.repair_stock(ProductId::new(1)).await.unwrap();
        assert_eq!(repaired, Some(16));
        assert_eq!(maintenance.repair_stock(ProductId::new(99)).await.unwrap(), None);
    }
}
