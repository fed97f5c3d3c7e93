//! Typed outcomes for the business conditions of a flash sale.

use crate::types::{OrderId, OrderToken, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// Result of one atomic check-and-decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Units were taken and a reservation mark written.
    Success {
        /// Units left after this decrement
        remaining: u64,
        /// Token written into the reservation mark
        token: OrderToken,
    },
    /// Not enough units left; stock untouched.
    SoldOut {
        /// Units left (fewer than requested)
        remaining: u64,
    },
    /// The user already holds a mark for this product; stock untouched.
    AlreadyClaimed,
    /// The product has no stock record.
    NotFound,
}

impl DecrementOutcome {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::SoldOut { .. } => "sold_out",
            Self::AlreadyClaimed => "already_claimed",
            Self::NotFound => "not_found",
        }
    }
}

/// Inbound purchase request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Product to buy
    pub product_id: ProductId,
    /// Buying user
    pub user_id: UserId,
    /// Units requested
    pub quantity: u32,
}

/// User-visible status of a purchase attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    /// Order created
    Success,
    /// Stock exhausted
    SoldOut,
    /// Replay of a purchase that already went through
    AlreadyClaimed,
    /// Product does not exist
    NotFound,
    /// Contention or degraded backing store; retry later
    Busy,
}

impl PurchaseStatus {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SoldOut => "sold_out",
            Self::AlreadyClaimed => "already_claimed",
            Self::NotFound => "not_found",
            Self::Busy => "busy",
        }
    }
}

/// Response returned to the purchase caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResponse {
    /// Outcome
    pub status: PurchaseStatus,
    /// Order created (only on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    /// Remaining stock hint, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_stock: Option<u64>,
    /// Human-readable explanation
    pub message: String,
}

impl PurchaseResponse {
    /// Successful purchase.
    #[must_use]
    pub fn success(order_id: OrderId, remaining_stock: u64) -> Self {
        Self {
            status: PurchaseStatus::Success,
            order_id: Some(order_id),
            remaining_stock: Some(remaining_stock),
            message: "Order created".to_string(),
        }
    }

    /// Rejection with an optional stock hint.
    #[must_use]
    pub fn rejected(
        status: PurchaseStatus,
        remaining_stock: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            order_id: None,
            remaining_stock,
            message: message.into(),
        }
    }
}
