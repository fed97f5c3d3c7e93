//! Prometheus metrics for the flash-sale core.
//!
//! Components record through the `metrics` facade; nothing is exported until a
//! recorder is installed. [`MetricsRecorder::install`] installs the Prometheus
//! recorder once per process and hands back a handle the HTTP layer renders at
//! `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use flashsale_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! let text = recorder.render();
//! # Ok(())
//! # }
//! ```

use flashsale_core::outcome::{DecrementOutcome, PurchaseStatus};
use flashsale_core::types::ProductId;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Describe every metric and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Install` if a recorder is already installed in
    /// this process.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        describe_metrics();
        tracing::info!("Prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(
        "flashsale_purchases_total",
        "Purchase attempts by outcome status"
    );
    describe_histogram!(
        "flashsale_purchase_duration_seconds",
        "End-to-end latency of a purchase attempt"
    );
    describe_counter!(
        "flashsale_decrements_total",
        "Atomic check-and-decrement calls by outcome"
    );
    describe_counter!(
        "flashsale_lock_acquisitions_total",
        "Distributed lock acquisitions by outcome (acquired, reentered, timed_out)"
    );
    describe_counter!(
        "flashsale_lock_leases_lost_total",
        "Leases that expired while their holder still held the handle"
    );
    describe_counter!(
        "flashsale_cache_lookups_total",
        "Product lookups by result (hit, stale, miss, filtered, negative, busy)"
    );
    describe_counter!(
        "flashsale_cache_refills_total",
        "Cache refills that queried the durable store"
    );
    describe_counter!(
        "flashsale_reservations_total",
        "Reservation lifecycle transitions (reserved, confirmed, released, expired)"
    );
    describe_counter!(
        "flashsale_invariant_violations_total",
        "Invariant violations detected; the affected product is halted"
    );
    describe_gauge!(
        "flashsale_halted_products",
        "Products currently halted after an invariant violation"
    );
}

/// Purchase metrics recorder.
pub struct PurchaseMetrics;

impl PurchaseMetrics {
    /// Record a finished purchase attempt.
    pub fn record(status: PurchaseStatus, duration: Duration) {
        counter!("flashsale_purchases_total", "status" => status.label()).increment(1);
        histogram!("flashsale_purchase_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an invariant violation and the resulting halt.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_invariant_violation(product_id: ProductId, halted: usize) {
        counter!(
            "flashsale_invariant_violations_total",
            "product_id" => product_id.to_string()
        )
        .increment(1);
        gauge!("flashsale_halted_products").set(halted as f64);
    }
}

/// Stock ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record a decrement outcome.
    pub fn record_decrement(outcome: &DecrementOutcome) {
        counter!("flashsale_decrements_total", "outcome" => outcome.label()).increment(1);
    }
}

/// Lock metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record an acquisition attempt outcome.
    pub fn record_acquisition(outcome: &'static str) {
        counter!("flashsale_lock_acquisitions_total", "outcome" => outcome).increment(1);
    }

    /// Record a lease observed lost by its renewal task.
    pub fn record_lease_lost() {
        counter!("flashsale_lock_leases_lost_total").increment(1);
    }
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a lookup result.
    pub fn record_lookup(result: &'static str) {
        counter!("flashsale_cache_lookups_total", "result" => result).increment(1);
    }

    /// Record a refill that reached the durable store.
    pub fn record_refill() {
        counter!("flashsale_cache_refills_total").increment(1);
    }
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record `count` lifecycle transitions.
    pub fn record_transition(transition: &'static str, count: u64) {
        counter!("flashsale_reservations_total", "transition" => transition).increment(count);
    }
}
