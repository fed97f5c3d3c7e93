//! HTTP tests over in-memory stores.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::StatusCode;
use axum_test::TestServer;
use flashsale_core::types::ProductId;
use flashsale_runtime::{Config, FlashSale, RetryPolicy};
use flashsale_testing::{InMemoryDurableStore, InMemorySharedStore, ManualClock};
use flashsale_web::{AppState, SharedStoreProbe, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    server: TestServer,
    shared: Arc<InMemorySharedStore>,
    durable: Arc<InMemoryDurableStore>,
}

async fn fixture(products: i64, quantity: u64) -> Fixture {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.orchestrator.persist_retry = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build();

    let clock = Arc::new(ManualClock::default());
    let shared = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
    let durable = Arc::new(InMemoryDurableStore::new());
    durable.seed_products(products, quantity);

    let flash_sale = FlashSale::new(&config, shared.clone(), durable.clone(), durable.clone(), clock);
    for id in 1..=products {
        flash_sale
            .maintenance()
            .init_stock(ProductId::new(id), quantity)
            .await
            .unwrap();
    }

    let state = AppState::new(flash_sale)
        .with_probe(Arc::new(SharedStoreProbe::new("shared", shared.clone())));
    Fixture {
        server: TestServer::new(router(state)).unwrap(),
        shared,
        durable,
    }
}

fn purchase(product: i64, user: i64, quantity: u32) -> Value {
    json!({ "product_id": product, "user_id": user, "quantity": quantity })
}

#[tokio::test]
async fn purchase_then_replay() {
    let fx = fixture(1, 5).await;

    let response = fx.server.post("/api/purchases").json(&purchase(1, 7, 2)).await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["remaining_stock"], 3);
    assert!(body["order_id"].is_string());

    let replay = fx.server.post("/api/purchases").json(&purchase(1, 7, 1)).await;
    replay.assert_status(StatusCode::CONFLICT);
    assert_eq!(replay.json::<Value>()["status"], "ALREADY_CLAIMED");
    assert_eq!(fx.durable.orders().len(), 1);
}

#[tokio::test]
async fn sold_out_and_unknown_products() {
    let fx = fixture(1, 1).await;

    fx.server
        .post("/api/purchases")
        .json(&purchase(1, 1, 1))
        .await
        .assert_status(StatusCode::OK);

    let sold_out = fx.server.post("/api/purchases").json(&purchase(1, 2, 1)).await;
    sold_out.assert_status(StatusCode::CONFLICT);
    assert_eq!(sold_out.json::<Value>()["status"], "SOLD_OUT");

    let rebuilt = fx.server.post("/admin/filter/rebuild").json(&json!({})).await;
    rebuilt.assert_status(StatusCode::OK);
    assert_eq!(rebuilt.json::<Value>()["count"], 1);

    let unknown = fx.server.post("/api/purchases").json(&purchase(404, 2, 1)).await;
    unknown.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(unknown.json::<Value>()["status"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_quantity_is_unprocessable() {
    let fx = fixture(1, 5).await;
    let response = fx.server.post("/api/purchases").json(&purchase(1, 1, 0)).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn reservation_cancel_outcomes() {
    let fx = fixture(1, 5).await;

    fx.server
        .delete("/api/reservations/1/9")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    fx.server
        .post("/api/purchases")
        .json(&purchase(1, 9, 1))
        .await
        .assert_status(StatusCode::OK);
    fx.server
        .delete("/api/reservations/1/9")
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn order_status_events() {
    let fx = fixture(1, 5).await;
    let body: Value = fx
        .server
        .post("/api/purchases")
        .json(&purchase(1, 3, 1))
        .await
        .json();
    let order_id = body["order_id"].as_str().unwrap().to_string();

    let paid = fx.server.post(&format!("/api/orders/{order_id}/paid")).await;
    paid.assert_status(StatusCode::OK);
    assert_eq!(paid.json::<Value>()["status"], "PAID");

    fx.server
        .post(&format!("/api/orders/{order_id}/cancel"))
        .await
        .assert_status(StatusCode::CONFLICT);

    let fetched = fx.server.get(&format!("/api/orders/{order_id}")).await;
    fetched.assert_status(StatusCode::OK);
    assert_eq!(fetched.json::<Value>()["quantity"], 1);

    fx.server
        .post("/api/orders/00000000-0000-0000-0000-000000000000/paid")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_stock_warm_and_repair() {
    let fx = fixture(2, 10).await;

    let seeded = fx
        .server
        .post("/admin/stock")
        .json(&json!({ "product_id": 2, "quantity": 4 }))
        .await;
    seeded.assert_status(StatusCode::OK);
    assert_eq!(seeded.json::<Value>()["product_id"], 2);

    let warmed = fx
        .server
        .post("/admin/cache/warm")
        .json(&json!({ "product_ids": [1, 2] }))
        .await;
    warmed.assert_status(StatusCode::OK);
    assert_eq!(warmed.json::<Value>()["count"], 2);

    fx.server
        .post("/api/purchases")
        .json(&purchase(1, 1, 3))
        .await
        .assert_status(StatusCode::OK);

    let repaired = fx.server.post("/admin/stock/1/repair").await;
    repaired.assert_status(StatusCode::OK);
    let body: Value = repaired.json();
    assert_eq!(body["available"], 7);
    assert_eq!(body["resumed"], false);

    fx.server
        .post("/admin/stock/99/repair")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn store_outage_is_service_unavailable() {
    let fx = fixture(1, 5).await;
    fx.shared.set_available(false);

    let response = fx
        .server
        .post("/admin/stock")
        .json(&json!({ "product_id": 1, "quantity": 4 }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn health_readiness_and_request_ids() {
    let fx = fixture(1, 5).await;

    let health = fx.server.get("/health").await;
    health.assert_status(StatusCode::OK);
    health.assert_text("ok");
    assert!(health.headers().contains_key("x-request-id"));

    let ready = fx.server.get("/ready").await;
    ready.assert_status(StatusCode::OK);
    assert_eq!(ready.json::<Value>()["components"]["shared"], "ok");

    fx.shared.set_available(false);
    let not_ready = fx.server.get("/ready").await;
    not_ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(not_ready.json::<Value>()["status"], "not_ready");

    fx.server
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
