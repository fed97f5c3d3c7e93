//! Domain types for the flash-sale core.
//!
//! Identifiers are newtypes so a product id can never be passed where a user id
//! is expected. Records mirror what the shared store and the durable store hold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a product on sale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    /// Creates a `ProductId` from its numeric value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the numeric value
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Identifier of a purchasing user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a `UserId` from its numeric value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the numeric value
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Unique identifier for a durable order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random `OrderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Token identifying one reservation attempt.
///
/// Written into the reservation mark by the decrement script; every later
/// transition of that mark (confirm, release) must present the same token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderToken(Uuid);

impl OrderToken {
    /// Creates a new random `OrderToken`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Product data served through the cache protection layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub product_id: ProductId,
    /// Display name
    pub name: String,
    /// Unit price in cents
    pub price_cents: i64,
}

// ============================================================================
// Shared store records
// ============================================================================

/// Authoritative stock counter for a product, held only in the shared store.
///
/// `available_quantity` is never negative. It is changed exclusively by the
/// atomic decrement engine's scripts; `version` increases with every change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Product the counter belongs to
    pub product_id: ProductId,
    /// Units still available for reservation
    pub available_quantity: u64,
    /// Monotonic mutation counter
    pub version: u64,
}

/// Lifecycle state stored inside a reservation mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkState {
    /// Stock is held, no durable order yet
    Reserved,
    /// A durable order was persisted for this reservation
    Confirmed,
}

impl MarkState {
    /// Wire form used inside the shared store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Confirmed => "confirmed",
        }
    }

    /// Parse the wire form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reserved" => Some(Self::Reserved),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// "This user already claimed units of this product."
///
/// Created in the same atomic step as the stock decrement. A reserved mark
/// expires (and its units are returned) if it is never confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMark {
    /// Product reserved
    pub product_id: ProductId,
    /// User holding the reservation
    pub user_id: UserId,
    /// Token of the reservation attempt
    pub order_token: OrderToken,
    /// Units held
    pub quantity: u32,
    /// When the mark was written
    pub created_at: DateTime<Utc>,
    /// When an unconfirmed mark is released
    pub deadline: DateTime<Utc>,
    /// Current state
    pub state: MarkState,
    /// Durable order, once confirmed
    pub order_id: Option<OrderId>,
}

// ============================================================================
// Durable store records
// ============================================================================

/// Status of a durable order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, waiting for payment
    Pending,
    /// Payment received
    Paid,
    /// Cancelled by the user or by downstream processing
    Cancelled,
}

impl OrderStatus {
    /// Column value used by the durable store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the column value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PAID" => Some(Self::Paid),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether a downstream event may move an order from `self` to `next`.
    ///
    /// Only pending orders move; paid and cancelled are final.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid | Self::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable purchase record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub order_id: OrderId,
    /// Purchasing user
    pub user_id: UserId,
    /// Product bought
    pub product_id: ProductId,
    /// Units bought
    pub quantity: u32,
    /// Total amount in cents
    pub amount_cents: i64,
    /// Current status
    pub status: OrderStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order priced from `product`.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        product: &Product,
        quantity: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            user_id,
            product_id: product.product_id,
            quantity,
            amount_cents: product.price_cents.saturating_mul(i64::from(quantity)),
            status: OrderStatus::Pending,
            created_at,
        }
    }
}
