//! # Flashsale Testing
//!
//! Test doubles for the flash-sale inventory core.
//!
//! This crate provides:
//! - [`InMemorySharedStore`]: a shared store that runs every atomic script natively
//! - [`InMemoryDurableStore`]: orders and products with call counting and fault injection
//! - Clocks for deterministic time
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_testing::{InMemoryDurableStore, InMemorySharedStore};
//!
//! #[tokio::test]
//! async fn sells_out() {
//!     let shared = Arc::new(InMemorySharedStore::new());
//!     let durable = Arc::new(InMemoryDurableStore::new());
//!     durable.seed_products(1, 100);
//!     // build the runtime components over `shared` and `durable`...
//! }
//! ```

use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;

pub mod durable;
pub mod shared_store;

pub use durable::InMemoryDurableStore;
pub use shared_store::InMemorySharedStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flashsale_testing::mocks::FixedClock;
    /// use flashsale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Shared between the in-memory store (TTL expiry) and the runtime
    /// (reservation deadlines), so advancing it lapses both consistently.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl ManualClock {
        /// Clock starting at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Move time forward.
        pub fn advance(&self, by: Duration) {
            let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
            self.millis.fetch_add(by, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_default()
        }

        fn now_millis(&self) -> i64 {
            self.millis.load(Ordering::SeqCst)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use flashsale_core::outcome::PurchaseRequest;
    use flashsale_core::types::{ProductId, UserId};
    use proptest::prelude::*;

    /// Product ids in `1..=max`.
    pub fn product_id(max: i64) -> impl Strategy<Value = ProductId> {
        (1..=max).prop_map(ProductId::new)
    }

    /// User ids in `1..=max`.
    pub fn user_id(max: i64) -> impl Strategy<Value = UserId> {
        (1..=max).prop_map(UserId::new)
    }

    /// Purchase requests over small id spaces, so collisions are frequent.
    pub fn purchase_request(
        products: i64,
        users: i64,
        max_quantity: u32,
    ) -> impl Strategy<Value = PurchaseRequest> {
        (product_id(products), user_id(users), 1..=max_quantity).prop_map(
            |(product_id, user_id, quantity)| PurchaseRequest {
                product_id,
                user_id,
                quantity,
            },
        )
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now_millis();
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now_millis(), start + 1_500);
        assert_eq!(clock.now().timestamp_millis(), start + 1_500);
    }
}
