//! Error types for the flash-sale core.
//!
//! Sold out, already claimed, not found and lock timeouts are normal outcomes of
//! a flash sale and are modelled as enum values (see [`crate::outcome`]).
//! Only the conditions below travel as `Err`.

use crate::types::ProductId;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, FlashSaleError>;

/// Errors raised by store adapters (shared store and durable store).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or state precondition in the durable store failed.
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// A script returned a shape its caller does not understand.
    #[error("Unexpected reply from script {script}: {detail}")]
    UnexpectedReply {
        /// Script name
        script: &'static str,
        /// What was wrong with the reply
        detail: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors surfaced by the flash-sale runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashSaleError {
    /// A backing store failed (`STORE_UNAVAILABLE` when transient).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The atomicity guarantee was bypassed somewhere (e.g. negative stock).
    ///
    /// Fatal for the affected product: processing for it halts.
    #[error("Invariant violated for product {product_id}: {detail}")]
    InvariantViolation {
        /// Product whose state is inconsistent
        product_id: ProductId,
        /// What was observed
        detail: String,
    },

    /// The request can never succeed as sent (e.g. zero quantity).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected at startup.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlashSaleError {
    /// Whether this is the recoverable `STORE_UNAVAILABLE` condition.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }

    /// Whether this is an invariant violation.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_is_transient() {
        let err: FlashSaleError = StoreError::Unavailable("connection refused".into()).into();
        assert!(err.is_store_unavailable());
        assert!(!err.is_invariant_violation());
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn conflicts_are_not_transient() {
        assert!(!StoreError::Conflict("duplicate".into()).is_transient());
        let err: FlashSaleError = StoreError::Conflict("duplicate".into()).into();
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn invariant_violation_names_product() {
        let err = FlashSaleError::InvariantViolation {
            product_id: ProductId::new(9),
            detail: "available=-1".into(),
        };
        assert_eq!(err.to_string(), "Invariant violated for product 9: available=-1");
    }
}
