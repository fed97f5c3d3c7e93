//! Operator endpoints. None of these run on the purchase path.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use flashsale_core::types::ProductId;
use serde::{Deserialize, Serialize};

/// Body of `POST /admin/stock`.
#[derive(Debug, Deserialize)]
pub struct InitStockRequest {
    /// Product to seed
    pub product_id: ProductId,
    /// Units available for sale
    pub quantity: u64,
}

/// Result of seeding stock.
#[derive(Debug, Serialize)]
pub struct InitStockResponse {
    /// Product seeded
    pub product_id: ProductId,
    /// Counter version after the write
    pub version: u64,
}

/// Seed or reseed a product's available quantity.
///
/// # Errors
///
/// `503` if the shared store is down.
pub async fn init_stock(
    State(state): State<AppState>,
    Json(request): Json<InitStockRequest>,
) -> Result<Json<InitStockResponse>, AppError> {
    let version = state
        .flash_sale
        .maintenance()
        .init_stock(request.product_id, request.quantity)
        .await?;
    tracing::info!(
        product_id = %request.product_id,
        quantity = request.quantity,
        version,
        "Stock initialised"
    );
    Ok(Json(InitStockResponse {
        product_id: request.product_id,
        version,
    }))
}

/// Body of `POST /admin/filter/rebuild`.
#[derive(Debug, Default, Deserialize)]
pub struct RebuildFilterRequest {
    /// Explicit id set; the whole catalogue when absent
    #[serde(default)]
    pub product_ids: Option<Vec<ProductId>>,
}

/// Body of `POST /admin/cache/warm`.
#[derive(Debug, Deserialize)]
pub struct WarmCacheRequest {
    /// Products to pre-load
    pub product_ids: Vec<ProductId>,
}

/// Count of items an operation touched.
#[derive(Debug, Serialize)]
pub struct CountResponse {
    /// Products included
    pub count: usize,
}

/// Replace the existence filter.
///
/// # Errors
///
/// `503` if the catalogue cannot be read; the old filter stays in place.
pub async fn rebuild_filter(
    State(state): State<AppState>,
    Json(request): Json<RebuildFilterRequest>,
) -> Result<Json<CountResponse>, AppError> {
    let maintenance = state.flash_sale.maintenance();
    let count = match request.product_ids {
        Some(ids) => maintenance.rebuild_existence_filter(&ids),
        None => maintenance.rebuild_filter_from_catalog().await?,
    };
    Ok(Json(CountResponse { count }))
}

/// Pre-load cache entries with independently jittered TTLs.
///
/// # Errors
///
/// `503` if either store is down.
pub async fn warm_cache(
    State(state): State<AppState>,
    Json(request): Json<WarmCacheRequest>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state
        .flash_sale
        .maintenance()
        .warm_cache(&request.product_ids)
        .await?;
    Ok(Json(CountResponse { count }))
}

/// Result of a counter repair.
#[derive(Debug, Serialize)]
pub struct RepairResponse {
    /// Product repaired
    pub product_id: ProductId,
    /// Recomputed available quantity
    pub available: u64,
    /// Whether a halt on the product was lifted
    pub resumed: bool,
}

/// Recompute a counter from the durable store and lift any halt.
///
/// # Errors
///
/// `404` if the catalogue has no baseline, `503` if a store is down.
pub async fn repair_stock(
    State(state): State<AppState>,
    Path(product_id): Path<ProductId>,
) -> Result<Json<RepairResponse>, AppError> {
    let available = state
        .flash_sale
        .maintenance()
        .repair_stock(product_id)
        .await?
        .ok_or_else(|| AppError::not_found("Stock baseline", product_id))?;
    let resumed = state.flash_sale.orchestrator().resume_product(product_id);
    tracing::warn!(product_id = %product_id, available, resumed, "Stock repaired");
    Ok(Json(RepairResponse {
        product_id,
        available,
        resumed,
    }))
}
