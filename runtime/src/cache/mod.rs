//! Cache protection layer.
//!
//! Sits in front of the [`ProductCatalog`] and keeps the durable store alive
//! through penetration, breakdown and avalanche. Lookup order is fixed:
//!
//! ```text
//! existence filter ─ definitely absent ──────────────────────► NotFound
//!        │
//! cache read (random replica for hot keys) ─ fresh ──────────► value
//!        │                                  └ stale ─ refresh ► value
//! single-flight refill (refill lock, double-checked read)
//!        │
//! jittered write (negative entries use the short jittered null TTL)
//! ```
//!
//! Losers of the refill race either poll with a short backoff
//! ([`RefillMode::Backoff`]) or queue on a per-key in-process gate before
//! touching the distributed refill lock ([`RefillMode::Coalesce`]). Both give
//! up with [`ProductLookup::Busy`] after `refill_wait_timeout`.

pub mod filter;
pub mod jitter;

pub use filter::ExistenceFilter;
pub use jitter::TtlJitter;

use crate::metrics::CacheMetrics;
use flashsale_core::environment::Clock;
use flashsale_core::error::{FlashSaleError, Result};
use flashsale_core::keys::KeySpace;
use flashsale_core::repository::ProductCatalog;
use flashsale_core::store::SharedStore;
use flashsale_core::types::{Product, ProductId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, sleep, timeout_at};
use uuid::Uuid;

/// How refill losers wait for the winner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefillMode {
    /// Sleep a short backoff and re-read the cache
    Backoff,
    /// Queue on an in-process per-key gate, then re-read
    #[default]
    Coalesce,
}

impl FromStr for RefillMode {
    type Err = FlashSaleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "backoff" => Ok(Self::Backoff),
            "coalesce" => Ok(Self::Coalesce),
            other => Err(FlashSaleError::Config(format!(
                "unknown refill mode {other:?} (expected backoff or coalesce)"
            ))),
        }
    }
}

/// Cache protection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Minimum physical TTL of a positive entry
    pub base_ttl: Duration,
    /// Width of the uniform jitter added to `base_ttl`
    pub ttl_jitter: Duration,
    /// Minimum physical TTL of a negative entry
    pub null_ttl: Duration,
    /// Width of the uniform jitter added to `null_ttl`
    pub null_ttl_jitter: Duration,
    /// Age after which an entry is served stale and refreshed in the background
    pub logical_ttl: Duration,
    /// Lease of the per-key refill lock
    pub refill_lock_ttl: Duration,
    /// Longest a lookup waits for another caller's refill
    pub refill_wait_timeout: Duration,
    /// Pause between re-reads in [`RefillMode::Backoff`]
    pub refill_backoff: Duration,
    /// Waiting strategy for refill losers
    pub refill_mode: RefillMode,
    /// Products whose entry is spread over replicas
    pub hot_products: Vec<ProductId>,
    /// Replica count for hot products
    pub hot_replicas: usize,
    /// Target false-positive rate of the existence filter
    pub filter_false_positive_rate: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl: Duration::from_secs(300),
            ttl_jitter: Duration::from_secs(60),
            null_ttl: Duration::from_secs(30),
            null_ttl_jitter: Duration::from_secs(10),
            logical_ttl: Duration::from_secs(240),
            refill_lock_ttl: Duration::from_secs(5),
            refill_wait_timeout: Duration::from_secs(1),
            refill_backoff: Duration::from_millis(20),
            refill_mode: RefillMode::Coalesce,
            hot_products: Vec::new(),
            hot_replicas: 4,
            filter_false_positive_rate: 0.01,
        }
    }
}

/// Result of a protected lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductLookup {
    /// The product exists
    Found(Product),
    /// Rejected by the filter, negatively cached, or absent from the durable store
    NotFound,
    /// Another caller is refilling and the wait budget ran out
    Busy,
}

/// Value stored under a cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedProduct {
    product: Option<Product>,
    logical_expiry_ms: i64,
}

impl CachedProduct {
    fn into_lookup(self) -> ProductLookup {
        self.product
            .map_or(ProductLookup::NotFound, ProductLookup::Found)
    }
}

fn to_json(entry: &CachedProduct) -> Result<String> {
    serde_json::to_string(entry).map_err(|e| {
        flashsale_core::error::StoreError::Serialization(format!("cache entry: {e}")).into()
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Layered cache protection over the product catalogue.
#[derive(Clone)]
pub struct CacheProtection {
    store: Arc<dyn SharedStore>,
    catalog: Arc<dyn ProductCatalog>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    config: Arc<CacheConfig>,
    jitter: TtlJitter,
    null_jitter: TtlJitter,
    hot: Arc<HashSet<ProductId>>,
    filter: Arc<RwLock<Option<ExistenceFilter>>>,
    gates: Arc<Mutex<HashMap<ProductId, Arc<AsyncMutex<()>>>>>,
    refreshing: Arc<Mutex<HashSet<ProductId>>>,
    last_known: Arc<Mutex<HashMap<ProductId, Product>>>,
}

impl CacheProtection {
    /// Creates the layer. Until a filter is installed every id passes the
    /// existence check.
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        catalog: Arc<dyn ProductCatalog>,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            keys,
            clock,
            jitter: TtlJitter::new(config.base_ttl, config.ttl_jitter),
            null_jitter: TtlJitter::new(config.null_ttl, config.null_ttl_jitter),
            hot: Arc::new(config.hot_products.iter().copied().collect()),
            config: Arc::new(config),
            filter: Arc::new(RwLock::new(None)),
            gates: Arc::new(Mutex::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            last_known: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Protected product lookup.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if the shared store fails, or if the
    /// durable store is unreachable during a refill (see [`Self::stale`]).
    pub async fn get_product(&self, product_id: ProductId) -> Result<ProductLookup> {
        if !self.might_exist(product_id) {
            CacheMetrics::record_lookup("filtered");
            tracing::trace!(product_id = %product_id, "Rejected by existence filter");
            return Ok(ProductLookup::NotFound);
        }

        if let Some(entry) = self.read_entry(product_id).await? {
            if entry.logical_expiry_ms <= self.clock.now_millis() {
                CacheMetrics::record_lookup("stale");
                self.spawn_refresh(product_id);
            } else if entry.product.is_some() {
                CacheMetrics::record_lookup("hit");
            } else {
                CacheMetrics::record_lookup("negative");
            }
            return Ok(entry.into_lookup());
        }

        CacheMetrics::record_lookup("miss");
        self.refill(product_id).await
    }

    /// Whether the existence filter admits `product_id`.
    #[must_use]
    pub fn might_exist(&self, product_id: ProductId) -> bool {
        self.filter
            .read()
            .map(|filter| {
                filter
                    .as_ref()
                    .is_none_or(|filter| filter.might_contain(product_id))
            })
            .unwrap_or(true)
    }

    /// Swap in a new existence filter.
    pub fn replace_filter(&self, filter: ExistenceFilter) {
        if let Ok(mut slot) = self.filter.write() {
            *slot = Some(filter);
        }
    }

    /// Build and install a filter over `ids`. Returns how many ids it holds.
    pub fn rebuild_filter(&self, ids: &[ProductId]) -> usize {
        let filter = ExistenceFilter::from_ids(ids, self.config.filter_false_positive_rate);
        let len = filter.len();
        self.replace_filter(filter);
        tracing::info!(products = len, "Existence filter rebuilt");
        len
    }

    /// Last value seen for `product_id`, ignoring logical expiry.
    ///
    /// Tries the shared store first and falls back to the last product this
    /// process loaded. Used to degrade when the durable store is down.
    pub async fn stale(&self, product_id: ProductId) -> Option<Product> {
        if let Ok(Some(CachedProduct {
            product: Some(product),
            ..
        })) = self.read_entry(product_id).await
        {
            return Some(product);
        }
        self.last_known
            .lock()
            .ok()
            .and_then(|known| known.get(&product_id).cloned())
    }

    /// Remove the entry and every replica. Returns how many keys existed.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if the shared store fails.
    pub async fn invalidate(&self, product_id: ProductId) -> Result<u64> {
        let mut keys = vec![self.keys.product_cache(product_id)];
        keys.extend(
            (0..self.config.hot_replicas).map(|i| self.keys.product_cache_replica(product_id, i)),
        );
        Ok(self.store.delete(keys).await?)
    }

    /// Pre-load entries, each key (and each replica) with its own TTL draw.
    ///
    /// Returns how many products were found and written.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if either store fails.
    pub async fn warm(&self, product_ids: &[ProductId]) -> Result<usize> {
        let mut entries = Vec::new();
        let mut found = 0;
        for &product_id in product_ids {
            CacheMetrics::record_refill();
            let product = self.catalog.find_product(product_id).await?;
            if product.is_some() {
                found += 1;
            }
            entries.extend(self.entries_for(product_id, product)?);
        }
        self.store.set_many(entries).await?;
        tracing::info!(requested = product_ids.len(), found, "Cache warmed");
        Ok(found)
    }

    async fn refill(&self, product_id: ProductId) -> Result<ProductLookup> {
        let deadline = Instant::now() + self.config.refill_wait_timeout;
        match self.config.refill_mode {
            RefillMode::Backoff => self.refill_under_lock(product_id, deadline).await,
            RefillMode::Coalesce => {
                let gate = self.gate(product_id);
                let result = match timeout_at(deadline, Arc::clone(&gate).lock_owned()).await {
                    Ok(_turn) => match self.read_entry(product_id).await {
                        Ok(Some(entry)) => Ok(entry.into_lookup()),
                        Ok(None) => self.refill_under_lock(product_id, deadline).await,
                        Err(e) => Err(e),
                    },
                    Err(_) => {
                        CacheMetrics::record_lookup("busy");
                        Ok(ProductLookup::Busy)
                    }
                };
                drop(gate);
                self.forget_gate(product_id);
                result
            }
        }
    }

    async fn refill_under_lock(
        &self,
        product_id: ProductId,
        deadline: Instant,
    ) -> Result<ProductLookup> {
        let lock_key = self.keys.product_refill_lock(product_id);
        loop {
            let token = Uuid::new_v4().to_string();
            if self
                .store
                .set_if_absent(lock_key.clone(), token.clone(), self.config.refill_lock_ttl)
                .await?
            {
                let result = match self.read_entry(product_id).await {
                    Ok(Some(entry)) => Ok(entry.into_lookup()),
                    Ok(None) => self.load(product_id).await.map(|product| {
                        product.map_or(ProductLookup::NotFound, ProductLookup::Found)
                    }),
                    Err(e) => Err(e),
                };
                self.release_refill_lock(lock_key, token).await;
                return result;
            }

            let now = Instant::now();
            if now >= deadline {
                CacheMetrics::record_lookup("busy");
                tracing::debug!(product_id = %product_id, "Gave up waiting for refill");
                return Ok(ProductLookup::Busy);
            }
            sleep(self.config.refill_backoff.min(deadline - now)).await;
            if let Some(entry) = self.read_entry(product_id).await? {
                return Ok(entry.into_lookup());
            }
        }
    }

    async fn release_refill_lock(&self, lock_key: String, token: String) {
        if let Err(e) = self.store.compare_and_delete(lock_key, token).await {
            tracing::warn!(error = %e, "Failed to release refill lock; it will expire");
        }
    }

    /// Query the durable store and write the result.
    async fn load(&self, product_id: ProductId) -> Result<Option<Product>> {
        CacheMetrics::record_refill();
        let product = self.catalog.find_product(product_id).await.map_err(|e| {
            tracing::warn!(product_id = %product_id, error = %e, "Durable store query failed during refill");
            e
        })?;
        let entries = self.entries_for(product_id, product.clone())?;
        self.store.set_many(entries).await?;

        if let Some(product) = &product {
            if let Ok(mut known) = self.last_known.lock() {
                known.insert(product_id, product.clone());
            }
        }
        tracing::debug!(product_id = %product_id, found = product.is_some(), "Cache refilled");
        Ok(product)
    }

    /// Keys, payloads and TTLs for one product.
    fn entries_for(
        &self,
        product_id: ProductId,
        product: Option<Product>,
    ) -> Result<Vec<(String, String, Duration)>> {
        let now = self.clock.now_millis();
        let negative = product.is_none();
        let logical = if negative {
            self.config.null_ttl
        } else {
            self.config.logical_ttl
        };
        let payload = to_json(&CachedProduct {
            product,
            logical_expiry_ms: now.saturating_add(millis(logical)),
        })?;
        let ttl = || {
            if negative {
                self.null_jitter.sample()
            } else {
                self.jitter.sample()
            }
        };

        if self.hot.contains(&product_id) {
            Ok((0..self.config.hot_replicas.max(1))
                .map(|i| {
                    (
                        self.keys.product_cache_replica(product_id, i),
                        payload.clone(),
                        ttl(),
                    )
                })
                .collect())
        } else {
            Ok(vec![(self.keys.product_cache(product_id), payload, ttl())])
        }
    }

    async fn read_entry(&self, product_id: ProductId) -> Result<Option<CachedProduct>> {
        let key = if self.hot.contains(&product_id) {
            let replica = rand::thread_rng().gen_range(0..self.config.hot_replicas.max(1));
            self.keys.product_cache_replica(product_id, replica)
        } else {
            self.keys.product_cache(product_id)
        };
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(product_id = %product_id, error = %e, "Discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    fn spawn_refresh(&self, product_id: ProductId) {
        let first = self
            .refreshing
            .lock()
            .map(|mut refreshing| refreshing.insert(product_id))
            .unwrap_or(false);
        if !first {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let lock_key = this.keys.product_refill_lock(product_id);
            let token = Uuid::new_v4().to_string();
            match this
                .store
                .set_if_absent(lock_key.clone(), token.clone(), this.config.refill_lock_ttl)
                .await
            {
                Ok(true) => {
                    if let Err(e) = this.load(product_id).await {
                        tracing::warn!(product_id = %product_id, error = %e, "Background refresh failed");
                    }
                    this.release_refill_lock(lock_key, token).await;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(product_id = %product_id, error = %e, "Background refresh skipped");
                }
            }
            if let Ok(mut refreshing) = this.refreshing.lock() {
                refreshing.remove(&product_id);
            }
        });
    }

    fn gate(&self, product_id: ProductId) -> Arc<AsyncMutex<()>> {
        match self.gates.lock() {
            Ok(mut gates) => Arc::clone(gates.entry(product_id).or_default()),
            Err(_) => Arc::new(AsyncMutex::new(())),
        }
    }

    fn forget_gate(&self, product_id: ProductId) {
        if let Ok(mut gates) = self.gates.lock() {
            if gates
                .get(&product_id)
                .is_some_and(|gate| Arc::strong_count(gate) == 1)
            {
                gates.remove(&product_id);
            }
        }
    }
}

impl std::fmt::Debug for CacheProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProtection")
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
