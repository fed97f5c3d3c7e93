//! Health, readiness and metrics endpoints.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use flashsale_core::types::ProductId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Liveness endpoint.
///
/// Returns 200 OK while the process runs. Dependencies are not checked.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `not_ready`
    pub status: &'static str,
    /// Per-component result; `ok` or the failure message
    pub components: BTreeMap<String, String>,
    /// Products whose sales are halted after an invariant violation
    pub halted_products: Vec<ProductId>,
}

/// Readiness endpoint.
///
/// # Status Codes
///
/// - 200 OK: every probe answered
/// - 503 Service Unavailable: at least one probe failed
///
/// Halted products are reported but do not fail readiness; other products
/// keep selling.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let mut components = BTreeMap::new();
    let mut ready = true;
    for probe in &state.probes {
        let result = match probe.check().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                ready = false;
                tracing::warn!(component = probe.component_name(), error = %e, "Readiness probe failed");
                e.to_string()
            }
        };
        components.insert(probe.component_name().to_string(), result);
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Readiness {
        status: if ready { "ready" } else { "not_ready" },
        components,
        halted_products: state.flash_sale.orchestrator().halted_products(),
    };
    (status, Json(body))
}

/// Prometheus text exposition.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(recorder) => recorder.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
