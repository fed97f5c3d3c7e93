//! Downstream order status events.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use flashsale_core::types::{Order, OrderId};

async fn transition(
    state: &AppState,
    order_id: OrderId,
    changed: bool,
    action: &str,
) -> Result<Json<Order>, AppError> {
    let order = state
        .flash_sale
        .orchestrator()
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order", order_id))?;
    if changed {
        Ok(Json(order))
    } else {
        Err(AppError::conflict(format!(
            "Order {order_id} is {} and cannot be {action}",
            order.status.as_str()
        )))
    }
}

/// Fetch an order.
///
/// # Errors
///
/// `404` if the order does not exist.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    state
        .flash_sale
        .orchestrator()
        .find_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Order", order_id))
}

/// Record payment for a pending order.
///
/// # Endpoint
///
/// ```text
/// POST /api/orders/{order_id}/paid
/// ```
///
/// # Errors
///
/// `404` for an unknown order, `409` if it is no longer pending.
pub async fn mark_paid(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    let changed = state.flash_sale.orchestrator().mark_order_paid(order_id).await?;
    transition(&state, order_id, changed, "paid").await
}

/// Cancel a pending order. Stock is not returned.
///
/// # Endpoint
///
/// ```text
/// POST /api/orders/{order_id}/cancel
/// ```
///
/// # Errors
///
/// `404` for an unknown order, `409` if it is no longer pending.
pub async fn cancel(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    let changed = state.flash_sale.orchestrator().cancel_order(order_id).await?;
    transition(&state, order_id, changed, "cancelled").await
}
