//! Error types for web handlers.
//!
//! Bridges [`FlashSaleError`] to HTTP responses. Business outcomes such as
//! sold out or busy never reach this type; handlers map them to status codes
//! directly.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use flashsale_core::error::{FlashSaleError, StoreError};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// Implements Axum's `IntoResponse`, logging server errors before they are
/// rendered as a JSON body.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT")
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR",
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "STORE_UNAVAILABLE",
        )
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<FlashSaleError> for AppError {
    fn from(err: FlashSaleError) -> Self {
        let mapped = match &err {
            FlashSaleError::Store(StoreError::Unavailable(_)) => {
                Self::unavailable("A backing store is unavailable; retry later")
            }
            FlashSaleError::Store(StoreError::Conflict(detail)) => Self::conflict(detail.clone()),
            FlashSaleError::Store(_) => Self::internal("Unexpected store reply"),
            FlashSaleError::InvariantViolation { product_id, .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Sales of product {product_id} are halted"),
                "INVARIANT_VIOLATION",
            ),
            FlashSaleError::InvalidRequest(detail) => Self::validation(detail.clone()),
            FlashSaleError::Config(detail) => Self::internal(detail.clone()),
        };
        mapped.with_source(err.into())
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::types::ProductId;

    #[test]
    fn test_error_display() {
        let err = AppError::validation("quantity must be at least 1");
        assert_eq!(err.to_string(), "[VALIDATION_ERROR] quantity must be at least 1");
    }

    #[test]
    fn test_store_unavailable_is_503() {
        let err = AppError::from(FlashSaleError::Store(StoreError::Unavailable(
            "connection refused".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_invariant_violation_is_500() {
        let err = AppError::from(FlashSaleError::InvariantViolation {
            product_id: ProductId::new(3),
            detail: "available=-1".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
        assert!(!err.message.contains("available"));
    }

    #[test]
    fn test_invalid_request_is_422() {
        let err = AppError::from(FlashSaleError::InvalidRequest("zero".to_string()));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
