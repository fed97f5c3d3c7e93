//! Axum HTTP entry point for the flash-sale core.
//!
//! A thin shell over [`flashsale_runtime::FlashSale`]: handlers parse the
//! request, call one runtime operation and map its outcome to a status code.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives with an `x-request-id` (generated if absent)
//! 2. **Extract** path parameters or the JSON body
//! 3. **Call** the orchestrator or a maintenance operation
//! 4. **Map** the outcome (`200/404/409/429`) or the error (`422/500/503`)
//! 5. **Return** JSON with the request id echoed back
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | `POST` | `/api/purchases` | [`handlers::purchases::purchase`] |
//! | `DELETE` | `/api/reservations/{product_id}/{user_id}` | [`handlers::purchases::cancel_reservation`] |
//! | `GET` | `/api/orders/{order_id}` | [`handlers::orders::get_order`] |
//! | `POST` | `/api/orders/{order_id}/paid` | [`handlers::orders::mark_paid`] |
//! | `POST` | `/api/orders/{order_id}/cancel` | [`handlers::orders::cancel`] |
//! | `POST` | `/admin/stock` | [`handlers::admin::init_stock`] |
//! | `POST` | `/admin/stock/{product_id}/repair` | [`handlers::admin::repair_stock`] |
//! | `POST` | `/admin/filter/rebuild` | [`handlers::admin::rebuild_filter`] |
//! | `POST` | `/admin/cache/warm` | [`handlers::admin::warm_cache`] |
//! | `GET` | `/health`, `/ready`, `/metrics` | [`handlers::health`] |

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::{AppState, ReadinessProbe, SharedStoreProbe};

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/purchases", post(handlers::purchases::purchase))
        .route(
            "/reservations/:product_id/:user_id",
            delete(handlers::purchases::cancel_reservation),
        )
        .route("/orders/:order_id", get(handlers::orders::get_order))
        .route("/orders/:order_id/paid", post(handlers::orders::mark_paid))
        .route("/orders/:order_id/cancel", post(handlers::orders::cancel));

    let admin = Router::new()
        .route("/stock", post(handlers::admin::init_stock))
        .route(
            "/stock/:product_id/repair",
            post(handlers::admin::repair_stock),
        )
        .route("/filter/rebuild", post(handlers::admin::rebuild_filter))
        .route("/cache/warm", post(handlers::admin::warm_cache));

    Router::new()
        .nest("/api", api)
        .nest("/admin", admin)
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
