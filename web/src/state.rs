//! Application state for Axum handlers.

use flashsale_core::store::{SharedStore, StoreFuture};
use flashsale_postgres::PostgresStore;
use flashsale_runtime::FlashSale;
use flashsale_runtime::metrics::MetricsRecorder;
use std::sync::Arc;

/// A dependency checked by `GET /ready`.
pub trait ReadinessProbe: Send + Sync {
    /// Component name for reporting.
    fn component_name(&self) -> &str;

    /// Round-trip check; should complete well under a second.
    fn check(&self) -> StoreFuture<'_, ()>;
}

/// Readiness of a shared store.
pub struct SharedStoreProbe {
    name: String,
    store: Arc<dyn SharedStore>,
}

impl SharedStoreProbe {
    /// Probe `store`, reported as `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl ReadinessProbe for SharedStoreProbe {
    fn component_name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> StoreFuture<'_, ()> {
        self.store.ping()
    }
}

impl ReadinessProbe for PostgresStore {
    fn component_name(&self) -> &str {
        "postgres"
    }

    fn check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.ping())
    }
}

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime components
    pub flash_sale: FlashSale,
    /// Prometheus recorder, when one is installed in this process
    pub metrics: Option<MetricsRecorder>,
    /// Dependencies checked for readiness
    pub probes: Vec<Arc<dyn ReadinessProbe>>,
}

impl AppState {
    /// Create state over a wired runtime.
    #[must_use]
    pub const fn new(flash_sale: FlashSale) -> Self {
        Self {
            flash_sale,
            metrics: None,
            probes: Vec::new(),
        }
    }

    /// Render metrics through `recorder`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }

    /// Check `probe` on every readiness request.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probes.push(probe);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("flash_sale", &self.flash_sale)
            .field("metrics", &self.metrics.is_some())
            .field("probes", &self.probes.len())
            .finish()
    }
}
