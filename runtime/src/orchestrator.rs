//! Purchase flow orchestration.
//!
//! One purchase walks these steps in order. Every exit after a successful
//! decrement and before confirmation returns the reserved units, unless the
//! durable store cannot say whether the order was written; those units stay
//! committed until `repair_stock`.
//!
//! ```text
//! validate → halted? → cache lookup → reserve (guard + decrement)
//!          → persist pending order (retry on transient failure)
//!          → confirm mark → respond
//! ```
//!
//! Business rejections come back as a [`PurchaseResponse`] with a status.
//! Only store failures and invariant violations are returned as `Err`.

use crate::cache::{CacheProtection, ProductLookup};
use crate::metrics::PurchaseMetrics;
use crate::reservation::{
    CancelOutcome, ConfirmOutcome, ReleaseReason, Reservation, ReservationManager, ReserveOutcome,
};
use crate::retry::{RetryPolicy, retry_with_backoff};
use flashsale_core::environment::Clock;
use flashsale_core::error::{FlashSaleError, Result, StoreError};
use flashsale_core::outcome::{PurchaseRequest, PurchaseResponse, PurchaseStatus};
use flashsale_core::repository::OrderRepository;
use flashsale_core::types::{Order, OrderId, OrderStatus, Product, ProductId, UserId};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::time::Instant;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Largest quantity a single purchase may request
    pub max_quantity: u32,
    /// Retry policy for durable order inserts
    pub persist_retry: RetryPolicy,
    /// Serve the last known product when the durable store is unreachable
    pub degrade_to_stale: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_quantity: 5,
            persist_retry: RetryPolicy::default(),
            degrade_to_stale: true,
        }
    }
}

/// Coordinates cache, reservations and durable orders for each purchase.
#[derive(Clone)]
pub struct FlowOrchestrator {
    cache: CacheProtection,
    reservations: ReservationManager,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    halted: Arc<RwLock<HashSet<ProductId>>>,
}

impl FlowOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        cache: CacheProtection,
        reservations: ReservationManager,
        orders: Arc<dyn OrderRepository>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            reservations,
            orders,
            clock,
            config,
            halted: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Cache protection layer in use.
    #[must_use]
    pub const fn cache(&self) -> &CacheProtection {
        &self.cache
    }

    /// Reservation manager in use.
    #[must_use]
    pub const fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    /// Run one purchase attempt.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the quantity is zero or above the configured maximum
    /// - `InvariantViolation` if the product's counter is inconsistent; the
    ///   product is halted and later purchases get `BUSY`
    /// - `Store` if a backing store fails in a way that cannot be degraded
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseResponse> {
        let started = Instant::now();
        let result = self.run_purchase(request).await;
        if let Ok(response) = &result {
            PurchaseMetrics::record(response.status, started.elapsed());
            tracing::debug!(
                product_id = %request.product_id,
                user_id = %request.user_id,
                status = response.status.label(),
                "Purchase finished"
            );
        }
        result
    }

    async fn run_purchase(&self, request: PurchaseRequest) -> Result<PurchaseResponse> {
        self.validate(&request)?;
        let PurchaseRequest {
            product_id,
            user_id,
            quantity,
        } = request;

        if self.is_halted(product_id) {
            return Ok(PurchaseResponse::rejected(
                PurchaseStatus::Busy,
                None,
                "Product is temporarily unavailable",
            ));
        }

        let product = match self.lookup(product_id).await? {
            Ok(product) => product,
            Err(rejection) => return Ok(rejection),
        };

        let reservation = match self.reservations.reserve(request).await {
            Ok(ReserveOutcome::Reserved(reservation)) => reservation,
            Ok(ReserveOutcome::SoldOut { remaining }) => {
                return Ok(PurchaseResponse::rejected(
                    PurchaseStatus::SoldOut,
                    Some(remaining),
                    "Sold out",
                ));
            }
            Ok(ReserveOutcome::AlreadyClaimed) => {
                return Ok(PurchaseResponse::rejected(
                    PurchaseStatus::AlreadyClaimed,
                    None,
                    "Already purchased",
                ));
            }
            Ok(ReserveOutcome::NotFound) => {
                return Ok(PurchaseResponse::rejected(
                    PurchaseStatus::NotFound,
                    None,
                    "Product is not on sale",
                ));
            }
            Ok(ReserveOutcome::Busy) => {
                return Ok(PurchaseResponse::rejected(
                    PurchaseStatus::Busy,
                    None,
                    "Too many concurrent attempts, retry later",
                ));
            }
            Err(e) => {
                if e.is_invariant_violation() {
                    self.halt(product_id, &e);
                }
                return Err(e);
            }
        };

        let remaining = reservation.remaining;
        let order = Order::pending(user_id, &product, quantity, self.clock.now());
        let persisted = retry_with_backoff(
            &self.config.persist_retry,
            || self.orders.insert_order(order.clone()),
            StoreError::is_transient,
        )
        .await;

        let order_id = match persisted {
            Ok(order_id) => order_id,
            Err(StoreError::Conflict(conflict)) => {
                // A retried insert conflicts with its own earlier attempt when
                // that attempt committed but its reply was lost.
                match self.orders.find_order(order.order_id).await {
                    Ok(Some(_)) => {
                        tracing::warn!(
                            order_id = %order.order_id,
                            "Order insert committed on an earlier attempt"
                        );
                        order.order_id
                    }
                    Ok(None) => {
                        tracing::debug!(
                            product_id = %product_id,
                            user_id = %user_id,
                            conflict = %conflict,
                            "Another order exists for this buyer"
                        );
                        self.release_unpersisted(reservation).await;
                        return Ok(PurchaseResponse::rejected(
                            PurchaseStatus::AlreadyClaimed,
                            None,
                            "Already purchased",
                        ));
                    }
                    Err(e) => {
                        // Ownership unknown: keep the units committed. A missing
                        // order then shows up as units `repair_stock` returns,
                        // never as oversold units.
                        tracing::error!(
                            order_id = %order.order_id,
                            error = %e,
                            "Could not tell whether the order was saved; holding its units"
                        );
                        if let Err(confirm_error) =
                            self.reservations.confirm(reservation, order.order_id).await
                        {
                            tracing::error!(error = %confirm_error, "Failed to hold units of unresolved order");
                        }
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.release_unpersisted(reservation).await;
                return Err(e.into());
            }
        };

        match self.reservations.confirm(reservation, order_id).await {
            Ok(ConfirmOutcome::Confirmed) => {
                tracing::info!(
                    product_id = %product_id,
                    user_id = %user_id,
                    order_id = %order_id,
                    quantity,
                    remaining,
                    "Order created"
                );
                Ok(PurchaseResponse::success(order_id, remaining))
            }
            Ok(ConfirmOutcome::Lapsed) => {
                self.cancel_unconfirmed(order_id).await;
                Ok(PurchaseResponse::rejected(
                    PurchaseStatus::Busy,
                    None,
                    "Reservation expired before the order was saved, retry",
                ))
            }
            Err(e) => {
                self.cancel_unconfirmed(order_id).await;
                Err(e)
            }
        }
    }

    fn validate(&self, request: &PurchaseRequest) -> Result<()> {
        if request.quantity == 0 || request.quantity > self.config.max_quantity {
            return Err(FlashSaleError::InvalidRequest(format!(
                "quantity must be between 1 and {}",
                self.config.max_quantity
            )));
        }
        Ok(())
    }

    /// Product lookup with degradation. `Ok(Err(response))` is a rejection.
    async fn lookup(
        &self,
        product_id: ProductId,
    ) -> Result<std::result::Result<Product, PurchaseResponse>> {
        match self.cache.get_product(product_id).await {
            Ok(ProductLookup::Found(product)) => Ok(Ok(product)),
            Ok(ProductLookup::NotFound) => Ok(Err(PurchaseResponse::rejected(
                PurchaseStatus::NotFound,
                None,
                "Product not found",
            ))),
            Ok(ProductLookup::Busy) => Ok(Err(PurchaseResponse::rejected(
                PurchaseStatus::Busy,
                None,
                "Product lookup is busy, retry later",
            ))),
            Err(e) if e.is_store_unavailable() => {
                let stale = if self.config.degrade_to_stale {
                    self.cache.stale(product_id).await
                } else {
                    None
                };
                match stale {
                    Some(product) => {
                        tracing::warn!(product_id = %product_id, error = %e, "Serving stale product data");
                        Ok(Ok(product))
                    }
                    None => {
                        tracing::warn!(product_id = %product_id, error = %e, "Product lookup unavailable");
                        Ok(Err(PurchaseResponse::rejected(
                            PurchaseStatus::Busy,
                            None,
                            "Service degraded, retry later",
                        )))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn release_unpersisted(&self, reservation: Reservation) {
        let (product_id, user_id) = (reservation.product_id, reservation.user_id);
        if let Err(e) = self
            .reservations
            .release(reservation, ReleaseReason::PersistFailed)
            .await
        {
            tracing::error!(
                product_id = %product_id,
                user_id = %user_id,
                error = %e,
                "Failed to release reservation after persistence failure; sweeper will reclaim it"
            );
        }
    }

    async fn cancel_unconfirmed(&self, order_id: OrderId) {
        match self
            .orders
            .update_order_status(order_id, OrderStatus::Cancelled)
            .await
        {
            Ok(_) => tracing::warn!(order_id = %order_id, "Cancelled order whose reservation lapsed"),
            Err(e) => tracing::error!(
                order_id = %order_id,
                error = %e,
                "Failed to cancel order whose reservation lapsed"
            ),
        }
    }

    fn halt(&self, product_id: ProductId, error: &FlashSaleError) {
        let halted = match self.halted.write() {
            Ok(mut halted) => {
                halted.insert(product_id);
                halted.len()
            }
            Err(_) => 0,
        };
        PurchaseMetrics::record_invariant_violation(product_id, halted);
        tracing::error!(product_id = %product_id, error = %error, "Product halted");
    }

    /// Whether purchases of `product_id` are halted.
    #[must_use]
    pub fn is_halted(&self, product_id: ProductId) -> bool {
        self.halted
            .read()
            .map(|halted| halted.contains(&product_id))
            .unwrap_or(true)
    }

    /// Every halted product, sorted.
    #[must_use]
    pub fn halted_products(&self) -> Vec<ProductId> {
        let mut products: Vec<_> = self
            .halted
            .read()
            .map(|halted| halted.iter().copied().collect())
            .unwrap_or_default();
        products.sort_unstable();
        products
    }

    /// Lift a halt, typically after `repair_stock`. Returns whether it was halted.
    pub fn resume_product(&self, product_id: ProductId) -> bool {
        let resumed = self
            .halted
            .write()
            .map(|mut halted| halted.remove(&product_id))
            .unwrap_or(false);
        if resumed {
            tracing::info!(product_id = %product_id, "Product resumed");
        }
        resumed
    }

    /// Cancel a user's unconfirmed reservation.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn cancel_reservation(
        &self,
        product_id: ProductId,
        user_id: UserId,
    ) -> Result<CancelOutcome> {
        self.reservations.cancel(product_id, user_id).await
    }

    /// Record payment for a pending order. Returns whether the status changed.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the durable store fails.
    pub async fn mark_order_paid(&self, order_id: OrderId) -> Result<bool> {
        let changed = self
            .orders
            .update_order_status(order_id, OrderStatus::Paid)
            .await?;
        tracing::info!(order_id = %order_id, changed, "Order payment recorded");
        Ok(changed)
    }

    /// Cancel a pending order. Returns whether the status changed.
    ///
    /// Confirmed units are not returned to stock.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the durable store fails.
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<bool> {
        let changed = self
            .orders
            .update_order_status(order_id, OrderStatus::Cancelled)
            .await?;
        tracing::info!(order_id = %order_id, changed, "Order cancelled");
        Ok(changed)
    }

    /// Look up a durable order.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the durable store fails.
    pub async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.find_order(order_id).await?)
    }
}

impl std::fmt::Debug for FlowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOrchestrator")
            .field("config", &self.config)
            .field("halted", &self.halted_products())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::ledger::StockLedger;
    use crate::lock::{LockConfig, LockManager};
    use crate::reservation::{ReservationConfig, ReservationState};
    use flashsale_core::keys::KeySpace;
    use flashsale_core::repository::ProductCatalog as _;
    use flashsale_core::store::StoreFuture;
    use flashsale_testing::{InMemoryDurableStore, InMemorySharedStore, ManualClock};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Commits the first insert, then reports the store unreachable.
    struct LostInsertReply {
        inner: Arc<InMemoryDurableStore>,
        dropped: AtomicBool,
    }

    /// Cancels the buyer's reservation while the first insert is in flight.
    struct CancelDuringInsert {
        inner: Arc<InMemoryDurableStore>,
        ledger: StockLedger,
        fired: AtomicBool,
    }

    impl OrderRepository for LostInsertReply {
        fn insert_order(&self, order: Order) -> StoreFuture<'_, OrderId> {
            Box::pin(async move {
                let order_id = self.inner.insert_order(order).await?;
                if self.dropped.swap(true, Ordering::SeqCst) {
                    Ok(order_id)
                } else {
                    Err(StoreError::Unavailable("reply lost".to_string()))
                }
            })
        }

        fn update_order_status(
            &self,
            order_id: OrderId,
            status: OrderStatus,
        ) -> StoreFuture<'_, bool> {
            self.inner.update_order_status(order_id, status)
        }

        fn find_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
            self.inner.find_order(order_id)
        }

        fn committed_quantity(&self, product_id: ProductId) -> StoreFuture<'_, u64> {
            self.inner.committed_quantity(product_id)
        }
    }

    impl OrderRepository for CancelDuringInsert {
        fn insert_order(&self, order: Order) -> StoreFuture<'_, OrderId> {
            Box::pin(async move {
                if !self.fired.swap(true, Ordering::SeqCst) {
                    self.ledger
                        .release(order.product_id, order.user_id, None)
                        .await
                        .unwrap();
                }
                self.inner.insert_order(order).await
            })
        }

        fn update_order_status(
            &self,
            order_id: OrderId,
            status: OrderStatus,
        ) -> StoreFuture<'_, bool> {
            self.inner.update_order_status(order_id, status)
        }

        fn find_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
            self.inner.find_order(order_id)
        }

        fn committed_quantity(&self, product_id: ProductId) -> StoreFuture<'_, u64> {
            self.inner.committed_quantity(product_id)
        }
    }

    struct Fixture {
        orchestrator: FlowOrchestrator,
        shared: Arc<InMemorySharedStore>,
        durable: Arc<InMemoryDurableStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(|durable, _| durable)
    }

    fn fixture_with(
        orders: impl FnOnce(Arc<InMemoryDurableStore>, StockLedger) -> Arc<dyn OrderRepository>,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let shared = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
        let durable = Arc::new(InMemoryDurableStore::new());
        durable.seed_products(5, 10);
        let keys = KeySpace::default();

        let reservation_config = ReservationConfig::default();
        let ledger = StockLedger::new(
            shared.clone(),
            keys.clone(),
            clock.clone(),
            reservation_config.ledger(),
        );
        let locks = LockManager::new(shared.clone(), keys.clone(), LockConfig::default());
        let orders = orders(durable.clone(), ledger.clone());
        let cache = CacheProtection::new(
            shared.clone(),
            durable.clone(),
            keys,
            clock.clone(),
            CacheConfig::default(),
        );
        let orchestrator = FlowOrchestrator::new(
            cache,
            ReservationManager::new(ledger, locks, reservation_config),
            orders,
            clock,
            OrchestratorConfig {
                persist_retry: RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(2))
                    .build(),
                ..OrchestratorConfig::default()
            },
        );
        Fixture {
            orchestrator,
            shared,
            durable,
        }
    }

    fn request(product: i64, user: i64, quantity: u32) -> PurchaseRequest {
        PurchaseRequest {
            product_id: ProductId::new(product),
            user_id: UserId::new(user),
            quantity,
        }
    }

    async fn init(f: &Fixture, product: i64, quantity: u64) {
        f.orchestrator
            .reservations()
            .ledger()
            .init_stock(ProductId::new(product), quantity)
            .await
            .unwrap();
    }

    async fn available(f: &Fixture, product: i64) -> u64 {
        f.orchestrator
            .reservations()
            .ledger()
            .stock(ProductId::new(product))
            .await
            .unwrap()
            .unwrap()
            .available_quantity
    }

    #[tokio::test]
    async fn successful_purchase_creates_one_pending_order() {
        let f = fixture();
        init(&f, 1, 10).await;

        let response = f.orchestrator.purchase(request(1, 42, 2)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::Success);
        assert_eq!(response.remaining_stock, Some(8));

        let orders = f.durable.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(Some(orders[0].order_id), response.order_id);
        assert_eq!(orders[0].status, OrderStatus::Pending);
        assert_eq!(orders[0].amount_cents, 2_000);

        let replay = f.orchestrator.purchase(request(1, 42, 2)).await.unwrap();
        assert_eq!(replay.status, PurchaseStatus::AlreadyClaimed);
        assert_eq!(available(&f, 1).await, 8);
    }

    #[tokio::test]
    async fn invalid_quantity_is_rejected_before_any_store_call() {
        let f = fixture();
        let before = f.shared.operation_count();
        let zero = f.orchestrator.purchase(request(1, 1, 0)).await.unwrap_err();
        let too_many = f.orchestrator.purchase(request(1, 1, 6)).await.unwrap_err();
        assert!(matches!(zero, FlashSaleError::InvalidRequest(_)));
        assert!(matches!(too_many, FlashSaleError::InvalidRequest(_)));
        assert_eq!(f.shared.operation_count(), before);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let f = fixture();
        let response = f.orchestrator.purchase(request(99, 1, 1)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::NotFound);
    }

    #[tokio::test]
    async fn sold_out_reports_remaining() {
        let f = fixture();
        init(&f, 2, 1).await;
        let response = f.orchestrator.purchase(request(2, 1, 2)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::SoldOut);
        assert_eq!(response.remaining_stock, Some(1));
    }

    #[tokio::test]
    async fn transient_insert_failures_are_retried() {
        let f = fixture();
        init(&f, 1, 10).await;
        f.durable.fail_next_inserts(2);

        let response = f.orchestrator.purchase(request(1, 5, 1)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::Success);
        assert_eq!(f.durable.orders().len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_returns_units() {
        let f = fixture();
        init(&f, 1, 10).await;
        f.durable.fail_next_inserts(100);

        let err = f.orchestrator.purchase(request(1, 5, 3)).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(available(&f, 1).await, 10);
        assert_eq!(
            f.orchestrator
                .reservations()
                .state(ProductId::new(1), UserId::new(5))
                .await
                .unwrap(),
            ReservationState::None
        );
        assert!(f.durable.orders().is_empty());
    }

    #[tokio::test]
    async fn insert_committed_before_a_lost_reply_keeps_its_units() {
        let f = fixture_with(|durable, _| {
            Arc::new(LostInsertReply {
                inner: durable,
                dropped: AtomicBool::new(false),
            })
        });
        init(&f, 1, 10).await;

        let response = f.orchestrator.purchase(request(1, 5, 3)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::Success);

        let orders = f.durable.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(Some(orders[0].order_id), response.order_id);
        assert_eq!(orders[0].status, OrderStatus::Pending);
        // Available plus live order units still equals the seeded stock.
        assert_eq!(available(&f, 1).await, 7);
        assert_eq!(
            f.orchestrator
                .reservations()
                .state(ProductId::new(1), UserId::new(5))
                .await
                .unwrap(),
            ReservationState::Confirmed
        );
    }

    #[tokio::test]
    async fn conflicting_order_of_another_attempt_is_already_claimed() {
        let f = fixture();
        init(&f, 1, 10).await;
        let product = f.durable.find_product(ProductId::new(1)).await.unwrap().unwrap();
        f.durable
            .insert_order(Order::pending(UserId::new(6), &product, 1, chrono::Utc::now()))
            .await
            .unwrap();

        let response = f.orchestrator.purchase(request(1, 6, 2)).await.unwrap();
        assert_eq!(response.status, PurchaseStatus::AlreadyClaimed);
        assert_eq!(available(&f, 1).await, 10);
        assert_eq!(f.durable.orders().len(), 1);
    }

    #[tokio::test]
    async fn buyer_can_retry_after_reservation_lapses_mid_purchase() {
        let f = fixture_with(|durable, ledger| {
            Arc::new(CancelDuringInsert {
                inner: durable,
                ledger,
                fired: AtomicBool::new(false),
            })
        });
        init(&f, 1, 10).await;

        let first = f.orchestrator.purchase(request(1, 5, 2)).await.unwrap();
        assert_eq!(first.status, PurchaseStatus::Busy);
        assert_eq!(available(&f, 1).await, 10);
        let orders = f.durable.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);

        let retry = f.orchestrator.purchase(request(1, 5, 2)).await.unwrap();
        assert_eq!(retry.status, PurchaseStatus::Success);
        assert_eq!(available(&f, 1).await, 8);
        assert_eq!(
            f.durable.committed_quantity(ProductId::new(1)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn invariant_violation_halts_product() {
        let f = fixture();
        init(&f, 3, 10).await;
        f.shared
            .force_field(&KeySpace::default().stock(ProductId::new(3)), "available", "-1")
            .unwrap();

        let err = f.orchestrator.purchase(request(3, 1, 1)).await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(f.orchestrator.is_halted(ProductId::new(3)));

        let next = f.orchestrator.purchase(request(3, 2, 1)).await.unwrap();
        assert_eq!(next.status, PurchaseStatus::Busy);
        assert_eq!(f.orchestrator.halted_products(), vec![ProductId::new(3)]);

        assert!(f.orchestrator.resume_product(ProductId::new(3)));
        assert!(!f.orchestrator.is_halted(ProductId::new(3)));
    }

    #[tokio::test]
    async fn durable_outage_degrades_to_stale_product() {
        let f = fixture();
        init(&f, 4, 10).await;
        f.orchestrator.cache().get_product(ProductId::new(4)).await.unwrap();
        f.orchestrator.cache().invalidate(ProductId::new(4)).await.unwrap();

        f.durable.set_available(false);
        let err = f.orchestrator.purchase(request(4, 1, 1)).await.unwrap_err();
        // The lookup degrades; the order insert itself still needs the durable store.
        assert!(err.is_store_unavailable());
        assert_eq!(available(&f, 4).await, 10);

        let unseen = f.orchestrator.purchase(request(5, 1, 1)).await.unwrap();
        assert_eq!(unseen.status, PurchaseStatus::Busy);
    }

    #[tokio::test]
    async fn order_status_events() {
        let f = fixture();
        init(&f, 1, 10).await;
        let paid = f.orchestrator.purchase(request(1, 1, 1)).await.unwrap();
        let cancelled = f.orchestrator.purchase(request(1, 2, 1)).await.unwrap();

        assert!(f.orchestrator.mark_order_paid(paid.order_id.unwrap()).await.unwrap());
        assert!(f.orchestrator.cancel_order(cancelled.order_id.unwrap()).await.unwrap());
        assert!(!f.orchestrator.cancel_order(paid.order_id.unwrap()).await.unwrap());

        let order = f.orchestrator.find_order(paid.order_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        // Cancelling an order does not restock.
        assert_eq!(available(&f, 1).await, 8);
    }

    #[tokio::test]
    async fn explicit_cancel_returns_units() {
        let f = fixture();
        init(&f, 1, 10).await;
        let reserved = f
            .orchestrator
            .reservations()
            .reserve(request(1, 9, 2))
            .await
            .unwrap();
        assert!(matches!(reserved, ReserveOutcome::Reserved(_)));
        drop(reserved);

        let outcome = f
            .orchestrator
            .cancel_reservation(ProductId::new(1), UserId::new(9))
            .await
            .unwrap();
        assert_eq!(outcome, CancelOutcome::Released { available: 10 });
    }
}
