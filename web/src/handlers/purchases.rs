//! Purchase and reservation endpoints.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use flashsale_core::outcome::{PurchaseRequest, PurchaseResponse, PurchaseStatus};
use flashsale_core::types::{ProductId, UserId};
use flashsale_runtime::reservation::CancelOutcome;
use serde::Serialize;

/// HTTP status for a purchase outcome.
#[must_use]
pub const fn status_code(status: PurchaseStatus) -> StatusCode {
    match status {
        PurchaseStatus::Success => StatusCode::OK,
        PurchaseStatus::NotFound => StatusCode::NOT_FOUND,
        PurchaseStatus::SoldOut | PurchaseStatus::AlreadyClaimed => StatusCode::CONFLICT,
        PurchaseStatus::Busy => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// Attempt a purchase.
///
/// # Endpoint
///
/// ```text
/// POST /api/purchases
/// {"product_id": 1, "user_id": 42, "quantity": 1}
/// ```
///
/// Every outcome carries a [`PurchaseResponse`] body; the status code is
/// `200`, `404`, `409` (sold out or already claimed) or `429` (busy, which
/// includes a product halted after an invariant violation).
///
/// # Errors
///
/// `422` for an invalid request, `503` when a store is down with no stale
/// data to fall back on, `500` for the invariant violation that halts a
/// product.
pub async fn purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let response = state.flash_sale.orchestrator().purchase(request).await?;
    Ok((status_code(response.status), Json(response)))
}

/// Body of a reservation cancellation.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Product the reservation was for
    pub product_id: ProductId,
    /// Units available after the release
    pub available: u64,
}

/// Cancel an unconfirmed reservation and return its units.
///
/// # Endpoint
///
/// ```text
/// DELETE /api/reservations/{product_id}/{user_id}
/// ```
///
/// # Errors
///
/// `404` if nothing is reserved, `409` if it already became an order.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path((product_id, user_id)): Path<(ProductId, UserId)>,
) -> Result<Json<CancelResponse>, AppError> {
    match state
        .flash_sale
        .orchestrator()
        .cancel_reservation(product_id, user_id)
        .await?
    {
        CancelOutcome::Released { available } => Ok(Json(CancelResponse {
            product_id,
            available,
        })),
        CancelOutcome::NoReservation => Err(AppError::not_found(
            "Reservation",
            format!("{product_id}/{user_id}"),
        )),
        CancelOutcome::AlreadyConfirmed => Err(AppError::conflict(
            "Reservation already became an order",
        )),
    }
}
