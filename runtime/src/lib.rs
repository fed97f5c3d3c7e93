//! # Flashsale Runtime
//!
//! Concurrency-safe inventory for flash sales: many concurrent purchase
//! attempts against few products, with no overselling, at most one successful
//! purchase per user and product, and a durable store shielded from cache
//! stampedes.
//!
//! ## Core Components
//!
//! - **Lock manager** ([`lock`]): reentrant, lease-based distributed locks with
//!   background renewal and multi-key acquisition in a global order
//! - **Stock ledger** ([`ledger`]): the only writer of stock counters and
//!   reservation marks; every transition is one atomic script
//! - **Cache protection** ([`cache`]): existence filter, single-flight refill,
//!   jittered TTLs, hot-key replicas, negative and logically expiring entries
//! - **Reservations** ([`reservation`]): reserve, confirm, release and the
//!   expiry sweeper, under a configurable flow guard
//! - **Orchestrator** ([`orchestrator`]): the end-to-end purchase flow
//! - **Maintenance** ([`maintenance`]): stock seeding, filter rebuilds, cache
//!   warm-up and counter repair
//!
//! ## Fairness
//!
//! There is no FIFO ordering across users. Lock waiters retry with jitter and
//! whichever attempt lands first wins; under contention a later request may
//! succeed before an earlier one. Throughput is preferred over fairness.
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_runtime::{FlashSale, config::Config};
//!
//! let config = Config::from_env()?;
//! config.validate()?;
//! let flash_sale = FlashSale::new(&config, shared_store, orders, catalog, clock);
//! let sweeper = flash_sale.start_sweeper();
//!
//! let response = flash_sale.orchestrator().purchase(request).await?;
//! ```

pub mod cache;
pub mod config;
pub mod ledger;
pub mod lock;
pub mod maintenance;
pub mod metrics;
pub mod orchestrator;
pub mod reservation;
pub mod retry;

pub use cache::{CacheConfig, CacheProtection, ProductLookup, RefillMode};
pub use config::Config;
pub use ledger::{LedgerConfig, StockLedger};
pub use lock::{AcquireOutcome, LockConfig, LockHandle, LockManager, LockOwner, ReleaseOutcome};
pub use maintenance::Maintenance;
pub use orchestrator::{FlowOrchestrator, OrchestratorConfig};
pub use reservation::{
    GuardMode, ReservationConfig, ReservationManager, ReservationState, SweeperHandle,
};
pub use retry::RetryPolicy;

use flashsale_core::environment::Clock;
use flashsale_core::keys::KeySpace;
use flashsale_core::repository::{OrderRepository, ProductCatalog};
use flashsale_core::store::SharedStore;
use std::sync::Arc;

/// Every runtime component wired over one shared store and one durable store.
#[derive(Clone, Debug)]
pub struct FlashSale {
    locks: LockManager,
    orchestrator: FlowOrchestrator,
    maintenance: Maintenance,
    config: Config,
}

impl FlashSale {
    /// Assemble the runtime from configuration and injected stores.
    #[must_use]
    pub fn new(
        config: &Config,
        shared: Arc<dyn SharedStore>,
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = KeySpace::new(config.redis.key_prefix.clone());
        let locks = LockManager::new(Arc::clone(&shared), keys.clone(), config.lock.clone());
        let ledger = StockLedger::new(
            Arc::clone(&shared),
            keys.clone(),
            Arc::clone(&clock),
            config.reservation.ledger(),
        );
        let cache = CacheProtection::new(
            shared,
            Arc::clone(&catalog),
            keys,
            Arc::clone(&clock),
            config.cache.clone(),
        );
        let reservations =
            ReservationManager::new(ledger.clone(), locks.clone(), config.reservation.clone());
        let orchestrator = FlowOrchestrator::new(
            cache.clone(),
            reservations,
            Arc::clone(&orders),
            clock,
            config.orchestrator.clone(),
        );
        let maintenance = Maintenance::new(ledger, cache, catalog, orders);

        Self {
            locks,
            orchestrator,
            maintenance,
            config: config.clone(),
        }
    }

    /// Purchase flow.
    #[must_use]
    pub const fn orchestrator(&self) -> &FlowOrchestrator {
        &self.orchestrator
    }

    /// Administrative operations.
    #[must_use]
    pub const fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }

    /// Distributed lock manager.
    #[must_use]
    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Start the reservation expiry sweeper at the configured interval.
    #[must_use]
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.orchestrator
            .reservations()
            .spawn_expiry_sweeper(self.config.reservation.sweep_interval)
    }
}
