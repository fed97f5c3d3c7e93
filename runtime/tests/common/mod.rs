//! Shared fixture: the full runtime over in-memory stores and a manual clock.

#![allow(dead_code, clippy::panic)]

use flashsale_core::outcome::PurchaseRequest;
use flashsale_core::types::{ProductId, UserId};
use flashsale_runtime::{Config, FlashSale, RetryPolicy};
use flashsale_testing::{InMemoryDurableStore, InMemorySharedStore, ManualClock};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub flash_sale: FlashSale,
    pub shared: Arc<InMemorySharedStore>,
    pub durable: Arc<InMemoryDurableStore>,
    pub clock: Arc<ManualClock>,
}

/// Default configuration with fast persistence retries.
pub fn config() -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap_or_else(|e| panic!("{e}"));
    config.orchestrator.persist_retry = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build();
    config
}

/// Route runtime logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(configure: impl FnOnce(&mut Config)) -> Harness {
    init_tracing();
    let mut config = config();
    configure(&mut config);
    config.validate().unwrap_or_else(|e| panic!("{e}"));

    let clock = Arc::new(ManualClock::default());
    let shared = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
    let durable = Arc::new(InMemoryDurableStore::new());
    let flash_sale = FlashSale::new(
        &config,
        shared.clone(),
        durable.clone(),
        durable.clone(),
        clock.clone(),
    );
    Harness {
        flash_sale,
        shared,
        durable,
        clock,
    }
}

impl Harness {
    /// Register `products` in the catalogue and seed each with `quantity` units.
    pub async fn seed(&self, products: i64, quantity: u64) {
        self.durable.seed_products(products, quantity);
        for id in 1..=products {
            self.flash_sale
                .maintenance()
                .init_stock(ProductId::new(id), quantity)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
    }

    pub async fn available(&self, product: i64) -> u64 {
        self.flash_sale
            .orchestrator()
            .reservations()
            .ledger()
            .stock(ProductId::new(product))
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .map_or(0, |record| record.available_quantity)
    }
}

pub fn request(product: i64, user: i64, quantity: u32) -> PurchaseRequest {
    PurchaseRequest {
        product_id: ProductId::new(product),
        user_id: UserId::new(user),
        quantity,
    }
}
