//! # Flashsale Core
//!
//! Core types and contracts for the flash-sale inventory core.
//!
//! This crate holds everything the runtime, the store adapters and the HTTP entry
//! point need to agree on, and nothing that performs I/O:
//!
//! - **Types**: product, stock, reservation mark and order records
//! - **Outcomes**: typed results for the business conditions of a purchase
//!   (sold out, already claimed, not found, busy) - these are values, not errors
//! - **Errors**: the small set of conditions that really are failures
//!   (store unavailable, invariant violation)
//! - **Store contracts**: the shared key-value/scripting store and the durable
//!   order/product store, injected as trait objects
//! - **Scripts**: the catalogue of atomic server-side scripts every shared store
//!   implementation must execute indivisibly
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ flashsale-web        HTTP entry point        │
//! ├──────────────────────────────────────────────┤
//! │ flashsale-runtime    Orchestrator → RLM      │
//! │                      → DLM + ADE, CPL        │
//! ├──────────────────────────────────────────────┤
//! │ flashsale-core       types, traits, scripts  │
//! ├────────────────────┬─────────────────────────┤
//! │ flashsale-redis    │ flashsale-postgres      │
//! │ (SharedStore)      │ (durable store)         │
//! └────────────────────┴─────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keys;
pub mod outcome;
pub mod repository;
pub mod script;
pub mod store;
pub mod types;

pub use error::{FlashSaleError, Result, StoreError};
pub use keys::KeySpace;
pub use outcome::{DecrementOutcome, PurchaseRequest, PurchaseResponse, PurchaseStatus};
pub use repository::{OrderRepository, ProductCatalog};
pub use script::{Script, ScriptReply};
pub use store::{SharedStore, StoreFuture};
pub use types::{
    MarkState, Order, OrderId, OrderStatus, OrderToken, Product, ProductId, ReservationMark,
    StockRecord, UserId,
};

/// Environment module - injected time source
///
/// Every TTL and deadline the core computes goes through a [`Clock`](environment::Clock)
/// so that tests can control time instead of sleeping.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use flashsale_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert!(clock.now_millis() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current time as Unix milliseconds, the unit the shared store scripts use.
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_millis_match_now() {
        let clock = SystemClock;
        let before = chrono::Utc::now().timestamp_millis();
        let millis = clock.now_millis();
        assert!(millis >= before);
    }
}
