//! Reservation lifecycle.
//!
//! A reservation is the stock held between a successful decrement and either a
//! durable order (confirm) or a release (cancel, persistence failure, TTL
//! lapse). Each process-level transition is one ledger script; the flow guard
//! taken in [`ReservationManager::reserve`] travels with the [`Reservation`]
//! until it is confirmed or released.
//!
//! ```text
//!            Decremented          OrderPersisted
//!   None ───────────────► Reserved ──────────────► Confirmed
//!                          │   ▲
//!          Cancelled/Expired│   │Replayed
//!                          ▼   │
//!                        Released
//! ```

use crate::ledger::{LedgerConfig, MarkConfirm, MarkRelease, StockLedger};
use crate::lock::{AcquireOutcome, LockHandle, LockManager, LockOwner};
use crate::metrics::ReservationMetrics;
use flashsale_core::error::{FlashSaleError, Result};
use flashsale_core::outcome::{DecrementOutcome, PurchaseRequest};
use flashsale_core::types::{MarkState, OrderId, OrderToken, ProductId, UserId};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ============================================================================
// State machine
// ============================================================================

/// Lifecycle state of one `(product, user)` reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReservationState {
    /// Nothing held
    #[default]
    None,
    /// Units held, no durable order yet
    Reserved,
    /// Durable order exists; units are committed
    Confirmed,
    /// Units returned to stock
    Released,
}

/// Events that move a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationEvent {
    /// The ledger took the units
    Decremented,
    /// The durable order was written and the mark confirmed
    OrderPersisted,
    /// Explicit cancel or persistence failure
    Cancelled,
    /// Deadline passed
    Expired,
    /// A duplicate purchase hit the existing mark
    Replayed,
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid reservation transition: {event:?} in state {from:?}")]
pub struct InvalidTransition {
    /// State the event was applied to
    pub from: ReservationState,
    /// Rejected event
    pub event: ReservationEvent,
}

impl ReservationState {
    /// Apply `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any event not allowed in `self`.
    /// `Confirmed` and `Released` accept nothing.
    pub const fn apply(self, event: ReservationEvent) -> std::result::Result<Self, InvalidTransition> {
        match (self, event) {
            (Self::None, ReservationEvent::Decremented) => Ok(Self::Reserved),
            (Self::Reserved, ReservationEvent::OrderPersisted) => Ok(Self::Confirmed),
            (Self::Reserved, ReservationEvent::Cancelled | ReservationEvent::Expired) => {
                Ok(Self::Released)
            }
            (Self::Reserved, ReservationEvent::Replayed) => Ok(Self::Reserved),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Whether no further event is accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Released)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Which flow guard wraps reserve → persist → confirm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GuardMode {
    /// No distributed lock; the decrement script alone provides atomicity
    None,
    /// One lock per `(product, user)`; serialises a user's retries
    #[default]
    PerUser,
    /// One lock per product; serialises every purchase of the product
    PerProduct,
}

impl GuardMode {
    /// Lock resource for a purchase, if this mode takes one.
    #[must_use]
    pub fn resource(self, product_id: ProductId, user_id: UserId) -> Option<String> {
        match self {
            Self::None => None,
            Self::PerUser => Some(format!("purchase:{product_id}:{user_id}")),
            Self::PerProduct => Some(format!("purchase:{product_id}")),
        }
    }
}

impl FromStr for GuardMode {
    type Err = FlashSaleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "per_user" => Ok(Self::PerUser),
            "per_product" => Ok(Self::PerProduct),
            other => Err(FlashSaleError::Config(format!(
                "unknown guard mode {other:?} (expected none, per_user or per_product)"
            ))),
        }
    }
}

/// Reservation lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Flow guard mode
    pub guard_mode: GuardMode,
    /// Longest wait for the flow guard
    pub guard_wait: Duration,
    /// Lease of the flow guard
    pub guard_lease: Duration,
    /// How long an unconfirmed reservation holds stock
    pub reservation_ttl: Duration,
    /// Extra physical lifetime of a reserved mark beyond its deadline
    pub sweep_grace: Duration,
    /// How long a confirmed mark keeps rejecting replays
    pub confirmed_mark_ttl: Duration,
    /// Period of the expiry sweeper
    pub sweep_interval: Duration,
    /// Marks released per sweeper script call
    pub sweep_batch: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            guard_mode: GuardMode::PerUser,
            guard_wait: Duration::from_millis(200),
            guard_lease: Duration::from_secs(5),
            reservation_ttl: Duration::from_secs(600),
            sweep_grace: Duration::from_secs(60),
            confirmed_mark_ttl: Duration::from_secs(86_400),
            sweep_interval: Duration::from_secs(1),
            sweep_batch: 500,
        }
    }
}

impl ReservationConfig {
    /// Mark lifetimes for the stock ledger.
    #[must_use]
    pub const fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            reservation_ttl: self.reservation_ttl,
            sweep_grace: self.sweep_grace,
            confirmed_mark_ttl: self.confirmed_mark_ttl,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Units held for one user, plus the flow guard protecting them.
#[derive(Debug)]
pub struct Reservation {
    /// Product reserved
    pub product_id: ProductId,
    /// User holding the units
    pub user_id: UserId,
    /// Units held
    pub quantity: u32,
    /// Token written into the mark
    pub token: OrderToken,
    /// Units left after the decrement
    pub remaining: u64,
    state: ReservationState,
    guard: Option<LockHandle>,
}

impl Reservation {
    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ReservationState {
        self.state
    }

    /// Move to the state `event` leads to. A rejected event is logged and
    /// leaves the state unchanged.
    fn advance(&mut self, event: ReservationEvent) -> ReservationState {
        match self.state.apply(event) {
            Ok(next) => self.state = next,
            Err(rejected) => tracing::error!(
                product_id = %self.product_id,
                user_id = %self.user_id,
                error = %rejected,
                "Reservation transition rejected"
            ),
        }
        self.state
    }

    /// Whether a flow guard is still held.
    #[must_use]
    pub const fn holds_guard(&self) -> bool {
        self.guard.is_some()
    }

    /// Whether the flow guard's lease was lost while held.
    #[must_use]
    pub fn guard_lost(&self) -> bool {
        self.guard.as_ref().is_some_and(LockHandle::is_lost)
    }
}

/// Result of [`ReservationManager::reserve`].
#[derive(Debug)]
pub enum ReserveOutcome {
    /// Units held
    Reserved(Reservation),
    /// Not enough units
    SoldOut {
        /// Units left
        remaining: u64,
    },
    /// The user already holds or bought units of this product
    AlreadyClaimed,
    /// The product has no stock record
    NotFound,
    /// The flow guard was not acquired in time
    Busy,
}

/// Result of [`ReservationManager::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The mark is confirmed for this order
    Confirmed,
    /// The mark no longer belongs to this reservation (it expired first)
    Lapsed,
}

/// Why a reservation was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The user or an operator cancelled
    Cancelled,
    /// The deadline passed
    Expired,
    /// The durable order could not be written
    PersistFailed,
}

impl ReleaseReason {
    const fn event(self) -> ReservationEvent {
        match self {
            Self::Cancelled | Self::PersistFailed => ReservationEvent::Cancelled,
            Self::Expired => ReservationEvent::Expired,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::PersistFailed => "persist_failed",
        }
    }
}

/// Result of [`ReservationManager::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Units returned
    Released {
        /// Units available afterwards
        available: u64,
    },
    /// Nothing reserved for this user
    NoReservation,
    /// The reservation already became an order
    AlreadyConfirmed,
}

// ============================================================================
// Manager
// ============================================================================

/// Drives reservations through the ledger under the configured flow guard.
#[derive(Clone)]
pub struct ReservationManager {
    ledger: StockLedger,
    locks: LockManager,
    config: ReservationConfig,
}

impl ReservationManager {
    /// Creates a manager.
    #[must_use]
    pub const fn new(ledger: StockLedger, locks: LockManager, config: ReservationConfig) -> Self {
        Self {
            ledger,
            locks,
            config,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Underlying ledger.
    #[must_use]
    pub const fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// Take the flow guard and atomically reserve units.
    ///
    /// The guard is released immediately on any outcome other than
    /// [`ReserveOutcome::Reserved`].
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a zero quantity
    /// - `InvariantViolation` if the ledger sees a negative counter
    /// - `Store` if the shared store fails
    pub async fn reserve(&self, request: PurchaseRequest) -> Result<ReserveOutcome> {
        let PurchaseRequest {
            product_id,
            user_id,
            quantity,
        } = request;

        let guard = match self.config.guard_mode.resource(product_id, user_id) {
            None => None,
            Some(resource) => {
                let owner = LockOwner::new();
                match self
                    .locks
                    .acquire(&owner, &resource, self.config.guard_wait, self.config.guard_lease)
                    .await?
                {
                    AcquireOutcome::Acquired(handle) => Some(handle),
                    AcquireOutcome::TimedOut => return Ok(ReserveOutcome::Busy),
                }
            }
        };

        let decremented = self
            .ledger
            .try_decrement(product_id, user_id, quantity)
            .await;
        let outcome = match decremented {
            Ok(DecrementOutcome::Success { remaining, token }) => {
                ReservationMetrics::record_transition("reserved", 1);
                let mut reservation = Reservation {
                    product_id,
                    user_id,
                    quantity,
                    token,
                    remaining,
                    state: ReservationState::None,
                    guard,
                };
                reservation.advance(ReservationEvent::Decremented);
                return Ok(ReserveOutcome::Reserved(reservation));
            }
            Ok(DecrementOutcome::SoldOut { remaining }) => Ok(ReserveOutcome::SoldOut { remaining }),
            Ok(DecrementOutcome::AlreadyClaimed) => Ok(ReserveOutcome::AlreadyClaimed),
            Ok(DecrementOutcome::NotFound) => Ok(ReserveOutcome::NotFound),
            Err(e) => Err(e),
        };
        self.release_guard(guard).await;
        outcome
    }

    /// Confirm a reservation against its durable order and drop the guard.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails; the guard is released anyway.
    pub async fn confirm(
        &self,
        mut reservation: Reservation,
        order_id: OrderId,
    ) -> Result<ConfirmOutcome> {
        let confirmed = self
            .ledger
            .confirm(
                reservation.product_id,
                reservation.user_id,
                reservation.token,
                order_id,
            )
            .await;
        self.release_guard(reservation.guard.take()).await;

        let event = match confirmed? {
            MarkConfirm::Confirmed | MarkConfirm::AlreadyConfirmed => {
                ReservationEvent::OrderPersisted
            }
            MarkConfirm::NoMark | MarkConfirm::TokenMismatch | MarkConfirm::ConfirmedElsewhere => {
                ReservationEvent::Expired
            }
        };
        if reservation.advance(event) == ReservationState::Confirmed {
            ReservationMetrics::record_transition("confirmed", 1);
            Ok(ConfirmOutcome::Confirmed)
        } else {
            tracing::warn!(
                product_id = %reservation.product_id,
                user_id = %reservation.user_id,
                order_id = %order_id,
                state = ?reservation.state,
                "Reservation lapsed before confirmation"
            );
            Ok(ConfirmOutcome::Lapsed)
        }
    }

    /// Return a reservation's units and drop the guard.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails; the guard is released anyway.
    pub async fn release(
        &self,
        mut reservation: Reservation,
        reason: ReleaseReason,
    ) -> Result<MarkRelease> {
        let released = self
            .ledger
            .release(
                reservation.product_id,
                reservation.user_id,
                Some(reservation.token),
            )
            .await;
        self.release_guard(reservation.guard.take()).await;

        let released = released?;
        match released {
            MarkRelease::Released { available } => {
                reservation.advance(reason.event());
                ReservationMetrics::record_transition(reason.label(), 1);
                tracing::info!(
                    product_id = %reservation.product_id,
                    user_id = %reservation.user_id,
                    quantity = reservation.quantity,
                    available,
                    reason = reason.label(),
                    "Reservation released"
                );
            }
            // The sweeper returned the units first.
            MarkRelease::NoMark | MarkRelease::TokenMismatch => {
                reservation.advance(ReservationEvent::Expired);
            }
            MarkRelease::AlreadyConfirmed => {
                reservation.advance(ReservationEvent::OrderPersisted);
            }
        }
        Ok(released)
    }

    /// Cancel whatever reservation `user_id` holds for `product_id`.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn cancel(&self, product_id: ProductId, user_id: UserId) -> Result<CancelOutcome> {
        let outcome = match self.ledger.release(product_id, user_id, None).await? {
            MarkRelease::Released { available } => {
                ReservationMetrics::record_transition(ReleaseReason::Cancelled.label(), 1);
                CancelOutcome::Released { available }
            }
            MarkRelease::AlreadyConfirmed => CancelOutcome::AlreadyConfirmed,
            MarkRelease::NoMark | MarkRelease::TokenMismatch => CancelOutcome::NoReservation,
        };
        tracing::debug!(product_id = %product_id, user_id = %user_id, ?outcome, "Reservation cancel");
        Ok(outcome)
    }

    /// Current state for `(product, user)` as recorded in the shared store.
    ///
    /// A released reservation leaves no mark, so it reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn state(&self, product_id: ProductId, user_id: UserId) -> Result<ReservationState> {
        Ok(match self.ledger.mark(product_id, user_id).await? {
            None => ReservationState::None,
            Some(mark) => match mark.state {
                MarkState::Reserved => ReservationState::Reserved,
                MarkState::Confirmed => ReservationState::Confirmed,
            },
        })
    }

    /// Release every reservation past its deadline. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn expire_due(&self) -> Result<u64> {
        let batch = self.config.sweep_batch.max(1);
        let mut total = 0;
        loop {
            let released = self.ledger.expire_due(batch).await?;
            total += released;
            if released < u64::try_from(batch).unwrap_or(u64::MAX) {
                break;
            }
        }
        if total > 0 {
            ReservationMetrics::record_transition(ReleaseReason::Expired.label(), total);
        }
        Ok(total)
    }

    /// Run [`Self::expire_due`] every `interval` until the handle is shut down.
    #[must_use]
    pub fn spawn_expiry_sweeper(&self, interval: Duration) -> SweeperHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => match manager.expire_due().await {
                        Ok(0) => {}
                        Ok(released) => tracing::info!(released, "Expired reservations released"),
                        Err(e) => tracing::warn!(error = %e, "Reservation sweep failed"),
                    },
                }
            }
            tracing::debug!("Expiry sweeper stopped");
        });
        SweeperHandle {
            shutdown: Some(shutdown),
            task,
        }
    }

    async fn release_guard(&self, guard: Option<LockHandle>) {
        if let Some(handle) = guard {
            if handle.is_lost() {
                tracing::warn!(resource = handle.resource(), "Flow guard lease was lost");
            }
            if let Err(e) = self.locks.release(handle).await {
                tracing::warn!(error = %e, "Failed to release flow guard; it will expire");
            }
        }
    }
}

impl fmt::Debug for ReservationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a running expiry sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the current pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Expiry sweeper ended abnormally");
        }
    }
}
