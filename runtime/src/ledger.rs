//! Atomic decrement engine.
//!
//! The stock ledger is the only writer of stock counters and reservation marks.
//! Every transition is one script in a single round trip, so check-then-act
//! races between callers are impossible:
//!
//! ```text
//! try_decrement:  check mark → read stock → subtract → write mark + pending index
//! release:        check token/state → add back → delete mark + unindex
//! confirm:        check token/state → mark confirmed + unindex
//! expire_due:     release every reserved mark past its deadline
//! ```
//!
//! Sold out, already claimed and not found are outcomes, not errors. A negative
//! counter observed by any script is an [`FlashSaleError::InvariantViolation`].

use crate::metrics::LedgerMetrics;
use chrono::DateTime;
use flashsale_core::environment::Clock;
use flashsale_core::error::{FlashSaleError, Result, StoreError};
use flashsale_core::keys::KeySpace;
use flashsale_core::outcome::DecrementOutcome;
use flashsale_core::script::{self, Script};
use flashsale_core::store::SharedStore;
use flashsale_core::types::{
    MarkState, OrderId, OrderToken, ProductId, ReservationMark, StockRecord, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Mark lifetimes used by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long a reserved mark holds stock before the sweeper releases it
    pub reservation_ttl: Duration,
    /// Extra physical lifetime of a reserved mark beyond its deadline
    pub sweep_grace: Duration,
    /// How long a confirmed mark keeps rejecting replays
    pub confirmed_mark_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(600),
            sweep_grace: Duration::from_secs(60),
            confirmed_mark_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Result of releasing a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkRelease {
    /// Units returned; `available` is the new counter value
    Released {
        /// Units available after the release
        available: u64,
    },
    /// No mark exists (already released, expired or never written)
    NoMark,
    /// A mark exists but belongs to another reservation attempt
    TokenMismatch,
    /// The mark is confirmed; confirmed units are never returned
    AlreadyConfirmed,
}

/// Result of confirming a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkConfirm {
    /// The mark moved to confirmed
    Confirmed,
    /// The mark was already confirmed with the same order
    AlreadyConfirmed,
    /// No mark exists; the reservation lapsed
    NoMark,
    /// The mark belongs to another reservation attempt
    TokenMismatch,
    /// The mark is confirmed with a different order
    ConfirmedElsewhere,
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn unexpected(script: &Script, detail: impl Into<String>) -> FlashSaleError {
    StoreError::UnexpectedReply {
        script: script.name,
        detail: detail.into(),
    }
    .into()
}

/// Stock counters and reservation marks in the shared store.
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl StockLedger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            config,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Atomically check the user's mark, check stock, decrement and write the mark.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a zero quantity
    /// - `InvariantViolation` if the counter is negative
    /// - `Store` if the shared store fails
    pub async fn try_decrement(
        &self,
        product_id: ProductId,
        user_id: UserId,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        if quantity == 0 {
            return Err(FlashSaleError::InvalidRequest(
                "quantity must be at least 1".to_string(),
            ));
        }

        let token = OrderToken::new();
        let token_text = token.to_string();
        let now = self.clock.now_millis();
        let deadline = now.saturating_add(millis(self.config.reservation_ttl));
        let mark_ttl = millis(self.config.reservation_ttl + self.config.sweep_grace);

        let reply = self
            .store
            .run_script(
                &script::TRY_DECREMENT,
                vec![
                    self.keys.stock(product_id),
                    self.keys.mark(product_id, user_id),
                    self.keys.pending_reservations(),
                ],
                vec![
                    quantity.to_string(),
                    token_text.clone(),
                    now.to_string(),
                    deadline.to_string(),
                    mark_ttl.to_string(),
                    KeySpace::pending_member(product_id, user_id, &token_text, quantity),
                ],
            )
            .await?;

        let (code, value) = reply.into_pair(&script::TRY_DECREMENT)?;
        let remaining = value.max(0).unsigned_abs();
        let outcome = match code {
            1 => DecrementOutcome::Success { remaining, token },
            0 => DecrementOutcome::SoldOut { remaining },
            -1 => DecrementOutcome::AlreadyClaimed,
            -2 => DecrementOutcome::NotFound,
            -3 => {
                tracing::error!(
                    product_id = %product_id,
                    available = value,
                    "Negative stock observed by decrement"
                );
                return Err(FlashSaleError::InvariantViolation {
                    product_id,
                    detail: format!("available={value}"),
                });
            }
            other => {
                return Err(unexpected(&script::TRY_DECREMENT, format!("code {other}")));
            }
        };

        LedgerMetrics::record_decrement(&outcome);
        tracing::debug!(
            product_id = %product_id,
            user_id = %user_id,
            quantity,
            outcome = outcome.label(),
            "Decrement attempted"
        );
        Ok(outcome)
    }

    /// Return a reserved mark's units to stock.
    ///
    /// `token = None` releases whatever reserved mark the user holds.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn release(
        &self,
        product_id: ProductId,
        user_id: UserId,
        token: Option<OrderToken>,
    ) -> Result<MarkRelease> {
        let reply = self
            .store
            .run_script(
                &script::RELEASE_RESERVATION,
                vec![
                    self.keys.stock(product_id),
                    self.keys.mark(product_id, user_id),
                    self.keys.pending_reservations(),
                ],
                vec![
                    token.map(|t| t.to_string()).unwrap_or_default(),
                    product_id.to_string(),
                    user_id.to_string(),
                ],
            )
            .await?;

        let (code, value) = reply.into_pair(&script::RELEASE_RESERVATION)?;
        let outcome = match code {
            1 => MarkRelease::Released {
                available: value.max(0).unsigned_abs(),
            },
            0 => MarkRelease::NoMark,
            -1 => MarkRelease::TokenMismatch,
            -2 => MarkRelease::AlreadyConfirmed,
            other => {
                return Err(unexpected(&script::RELEASE_RESERVATION, format!("code {other}")));
            }
        };
        tracing::debug!(product_id = %product_id, user_id = %user_id, ?outcome, "Reservation release");
        Ok(outcome)
    }

    /// Promote a reserved mark to confirmed, recording the durable order.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn confirm(
        &self,
        product_id: ProductId,
        user_id: UserId,
        token: OrderToken,
        order_id: OrderId,
    ) -> Result<MarkConfirm> {
        let reply = self
            .store
            .run_script(
                &script::CONFIRM_RESERVATION,
                vec![
                    self.keys.mark(product_id, user_id),
                    self.keys.pending_reservations(),
                ],
                vec![
                    token.to_string(),
                    order_id.to_string(),
                    millis(self.config.confirmed_mark_ttl).to_string(),
                    product_id.to_string(),
                    user_id.to_string(),
                ],
            )
            .await?;

        match reply.into_int(&script::CONFIRM_RESERVATION)? {
            1 => Ok(MarkConfirm::Confirmed),
            2 => Ok(MarkConfirm::AlreadyConfirmed),
            0 => Ok(MarkConfirm::NoMark),
            -1 => Ok(MarkConfirm::TokenMismatch),
            -2 => Ok(MarkConfirm::ConfirmedElsewhere),
            other => Err(unexpected(&script::CONFIRM_RESERVATION, format!("code {other}"))),
        }
    }

    /// Release up to `limit` reserved marks whose deadline has passed.
    ///
    /// Returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn expire_due(&self, limit: usize) -> Result<u64> {
        let reply = self
            .store
            .run_script(
                &script::EXPIRE_RESERVATIONS,
                vec![self.keys.pending_reservations()],
                vec![
                    self.clock.now_millis().to_string(),
                    limit.to_string(),
                    self.keys.prefix().to_string(),
                ],
            )
            .await?;
        let released = reply.into_int(&script::EXPIRE_RESERVATIONS)?;
        Ok(released.max(0).unsigned_abs())
    }

    /// Seed or reseed a product's counter. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn init_stock(&self, product_id: ProductId, quantity: u64) -> Result<u64> {
        let reply = self
            .store
            .run_script(
                &script::INIT_STOCK,
                vec![self.keys.stock(product_id)],
                vec![quantity.to_string()],
            )
            .await?;
        let version = reply.into_int(&script::INIT_STOCK)?;
        tracing::info!(product_id = %product_id, quantity, version, "Stock initialised");
        Ok(version.max(0).unsigned_abs())
    }

    /// Current counter, or `None` if the product has no stock record.
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` if the counter is negative
    /// - `Store` if the shared store fails or the record is malformed
    pub async fn stock(&self, product_id: ProductId) -> Result<Option<StockRecord>> {
        let fields = self.store.get_fields(self.keys.stock(product_id)).await?;
        let Some(available) = fields.get("available") else {
            return Ok(None);
        };
        let available: i64 = available.parse().map_err(|_| {
            StoreError::Serialization(format!("stock counter is not an integer: {available}"))
        })?;
        if available < 0 {
            return Err(FlashSaleError::InvariantViolation {
                product_id,
                detail: format!("available={available}"),
            });
        }
        let version = fields
            .get("version")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(StockRecord {
            product_id,
            available_quantity: available.unsigned_abs(),
            version,
        }))
    }

    /// The user's mark for a product, if any.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails or the mark is malformed.
    pub async fn mark(
        &self,
        product_id: ProductId,
        user_id: UserId,
    ) -> Result<Option<ReservationMark>> {
        let fields = self
            .store
            .get_fields(self.keys.mark(product_id, user_id))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_mark(product_id, user_id, &fields).map(Some)
    }

    /// Recompute a counter from the durable baseline.
    ///
    /// `available = max(baseline - committed - held by pending reservations, 0)`.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store fails.
    pub async fn repair_stock(
        &self,
        product_id: ProductId,
        baseline: u64,
        committed: u64,
    ) -> Result<u64> {
        let reply = self
            .store
            .run_script(
                &script::REPAIR_STOCK,
                vec![
                    self.keys.stock(product_id),
                    self.keys.pending_reservations(),
                ],
                vec![
                    baseline.to_string(),
                    committed.to_string(),
                    product_id.to_string(),
                ],
            )
            .await?;
        let available = reply.into_int(&script::REPAIR_STOCK)?.max(0).unsigned_abs();
        tracing::warn!(product_id = %product_id, baseline, committed, available, "Stock repaired");
        Ok(available)
    }
}

fn parse_mark(
    product_id: ProductId,
    user_id: UserId,
    fields: &HashMap<String, String>,
) -> Result<ReservationMark> {
    let field = |name: &str| {
        fields.get(name).ok_or_else(|| {
            FlashSaleError::from(StoreError::Serialization(format!(
                "reservation mark missing field {name}"
            )))
        })
    };
    let malformed =
        |name: &str| FlashSaleError::from(StoreError::Serialization(format!("malformed mark field {name}")));
    let timestamp = |name: &str| -> Result<_> {
        let raw: i64 = field(name)?.parse().map_err(|_| malformed(name))?;
        DateTime::from_timestamp_millis(raw).ok_or_else(|| malformed(name))
    };

    Ok(ReservationMark {
        product_id,
        user_id,
        order_token: field("token")?.parse().map_err(|_| malformed("token"))?,
        quantity: field("quantity")?.parse().map_err(|_| malformed("quantity"))?,
        created_at: timestamp("created_at_ms")?,
        deadline: timestamp("deadline_ms")?,
        state: MarkState::parse(field("state")?).ok_or_else(|| malformed("state"))?,
        order_id: fields
            .get("order_id")
            .map(|raw| raw.parse().map_err(|_| malformed("order_id")))
            .transpose()?,
    })
}

impl std::fmt::Debug for StockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockLedger")
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_testing::{InMemorySharedStore, ManualClock};

    const PRODUCT: ProductId = ProductId::new(1);

    fn ledger() -> (StockLedger, Arc<InMemorySharedStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
        let ledger = StockLedger::new(
            store.clone(),
            KeySpace::default(),
            clock.clone(),
            LedgerConfig {
                reservation_ttl: Duration::from_secs(60),
                sweep_grace: Duration::from_secs(10),
                confirmed_mark_ttl: Duration::from_secs(3_600),
            },
        );
        (ledger, store, clock)
    }

    async fn available(ledger: &StockLedger) -> u64 {
        ledger.stock(PRODUCT).await.unwrap().unwrap().available_quantity
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (ledger, _, _) = ledger();
        let outcome = ledger.try_decrement(PRODUCT, UserId::new(1), 1).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::NotFound);
        assert_eq!(ledger.stock(PRODUCT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn decrement_writes_mark_and_rejects_replay() {
        let (ledger, _, _) = ledger();
        ledger.init_stock(PRODUCT, 5).await.unwrap();
        let user = UserId::new(7);

        let DecrementOutcome::Success { remaining, token } =
            ledger.try_decrement(PRODUCT, user, 2).await.unwrap()
        else {
            unreachable!("first decrement must succeed");
        };
        assert_eq!(remaining, 3);

        let mark = ledger.mark(PRODUCT, user).await.unwrap().unwrap();
        assert_eq!(mark.order_token, token);
        assert_eq!(mark.quantity, 2);
        assert_eq!(mark.state, MarkState::Reserved);
        assert_eq!(mark.deadline - mark.created_at, chrono::Duration::seconds(60));

        let replay = ledger.try_decrement(PRODUCT, user, 2).await.unwrap();
        assert_eq!(replay, DecrementOutcome::AlreadyClaimed);
        assert_eq!(available(&ledger).await, 3);
    }

    #[tokio::test]
    async fn insufficient_stock_is_sold_out_without_mark() {
        let (ledger, _, _) = ledger();
        ledger.init_stock(PRODUCT, 1).await.unwrap();
        let outcome = ledger.try_decrement(PRODUCT, UserId::new(1), 2).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::SoldOut { remaining: 1 });
        assert!(ledger.mark(PRODUCT, UserId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (ledger, _, _) = ledger();
        let err = ledger.try_decrement(PRODUCT, UserId::new(1), 0).await.unwrap_err();
        assert!(matches!(err, FlashSaleError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn negative_counter_is_an_invariant_violation() {
        let (ledger, store, _) = ledger();
        ledger.init_stock(PRODUCT, 1).await.unwrap();
        store.force_field("flashsale:stock:1", "available", "-1").unwrap();

        let err = ledger.try_decrement(PRODUCT, UserId::new(1), 1).await.unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[tokio::test]
    async fn release_checks_token_and_returns_units() {
        let (ledger, _, _) = ledger();
        ledger.init_stock(PRODUCT, 3).await.unwrap();
        let user = UserId::new(1);
        let DecrementOutcome::Success { token, .. } =
            ledger.try_decrement(PRODUCT, user, 2).await.unwrap()
        else {
            unreachable!("decrement must succeed");
        };

        let wrong = ledger.release(PRODUCT, user, Some(OrderToken::new())).await.unwrap();
        assert_eq!(wrong, MarkRelease::TokenMismatch);
        let released = ledger.release(PRODUCT, user, Some(token)).await.unwrap();
        assert_eq!(released, MarkRelease::Released { available: 3 });
        let again = ledger.release(PRODUCT, user, Some(token)).await.unwrap();
        assert_eq!(again, MarkRelease::NoMark);
    }

    #[tokio::test]
    async fn confirmed_mark_keeps_units_and_blocks_release() {
        let (ledger, _, clock) = ledger();
        ledger.init_stock(PRODUCT, 3).await.unwrap();
        let user = UserId::new(1);
        let DecrementOutcome::Success { token, .. } =
            ledger.try_decrement(PRODUCT, user, 1).await.unwrap()
        else {
            unreachable!("decrement must succeed");
        };
        let order = OrderId::new();

        assert_eq!(ledger.confirm(PRODUCT, user, token, order).await.unwrap(), MarkConfirm::Confirmed);
        assert_eq!(
            ledger.confirm(PRODUCT, user, token, order).await.unwrap(),
            MarkConfirm::AlreadyConfirmed
        );
        assert_eq!(
            ledger.confirm(PRODUCT, user, token, OrderId::new()).await.unwrap(),
            MarkConfirm::ConfirmedElsewhere
        );
        assert_eq!(
            ledger.release(PRODUCT, user, None).await.unwrap(),
            MarkRelease::AlreadyConfirmed
        );

        clock.advance(Duration::from_secs(120));
        assert_eq!(ledger.expire_due(100).await.unwrap(), 0);
        assert_eq!(available(&ledger).await, 2);
        assert_eq!(
            ledger.mark(PRODUCT, user).await.unwrap().unwrap().order_id,
            Some(order)
        );
    }

    #[tokio::test]
    async fn expiry_restores_exactly_the_reserved_quantity() {
        let (ledger, _, clock) = ledger();
        ledger.init_stock(PRODUCT, 10).await.unwrap();
        ledger.try_decrement(PRODUCT, UserId::new(1), 3).await.unwrap();
        clock.advance(Duration::from_secs(30));
        ledger.try_decrement(PRODUCT, UserId::new(2), 2).await.unwrap();
        assert_eq!(available(&ledger).await, 5);

        clock.advance(Duration::from_secs(31));
        assert_eq!(ledger.expire_due(100).await.unwrap(), 1);
        assert_eq!(available(&ledger).await, 8);
        assert!(ledger.mark(PRODUCT, UserId::new(1)).await.unwrap().is_none());

        clock.advance(Duration::from_secs(30));
        assert_eq!(ledger.expire_due(100).await.unwrap(), 1);
        assert_eq!(available(&ledger).await, 10);
    }

    #[tokio::test]
    async fn expiry_restores_units_of_vanished_marks() {
        let (ledger, store, clock) = ledger();
        ledger.init_stock(PRODUCT, 4).await.unwrap();
        ledger.try_decrement(PRODUCT, UserId::new(1), 4).await.unwrap();
        store
            .delete(vec![KeySpace::default().mark(PRODUCT, UserId::new(1))])
            .await
            .unwrap();

        clock.advance(Duration::from_secs(61));
        assert_eq!(ledger.expire_due(100).await.unwrap(), 1);
        assert_eq!(available(&ledger).await, 4);
    }

    #[tokio::test]
    async fn expiry_restores_units_of_replaced_marks() {
        let (ledger, store, clock) = ledger();
        ledger.init_stock(PRODUCT, 5).await.unwrap();
        ledger.try_decrement(PRODUCT, UserId::new(1), 2).await.unwrap();
        store
            .delete(vec![KeySpace::default().mark(PRODUCT, UserId::new(1))])
            .await
            .unwrap();
        // The vanished mark no longer blocks the user; a new reservation replaces it.
        ledger.try_decrement(PRODUCT, UserId::new(1), 3).await.unwrap();
        assert_eq!(available(&ledger).await, 0);

        clock.advance(Duration::from_secs(61));
        assert_eq!(ledger.expire_due(100).await.unwrap(), 2);
        assert_eq!(available(&ledger).await, 5);
    }

    #[tokio::test]
    async fn repair_subtracts_committed_and_pending() {
        let (ledger, store, _) = ledger();
        ledger.init_stock(PRODUCT, 10).await.unwrap();
        ledger.try_decrement(PRODUCT, UserId::new(1), 2).await.unwrap();
        store.force_field("flashsale:stock:1", "available", "-5").unwrap();

        let repaired = ledger.repair_stock(PRODUCT, 10, 3).await.unwrap();
        assert_eq!(repaired, 5);
        assert_eq!(available(&ledger).await, 5);
    }
}
