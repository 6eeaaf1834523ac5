use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::payments::PaymentError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Cart 550e8400-e29b-41d4-a716-446655440000 is empty",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Cart {0} not found")]
    CartNotFound(Uuid),

    #[error("Cart {0} is empty")]
    CartEmpty(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Payment provider unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Invalid Signature")]
    InvalidSignature,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature => ServiceError::InvalidSignature,
            PaymentError::MalformedEvent(msg) => ServiceError::BadRequest(msg),
            PaymentError::Unavailable(msg) => ServiceError::PaymentUnavailable(msg),
            PaymentError::SessionCreation(msg) => ServiceError::PaymentFailed(msg),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CartNotFound(_)
            | Self::CartEmpty(_)
            | Self::InvalidSignature
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::PaymentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::PaymentFailed(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            // Provider error text can carry account details
            Self::PaymentFailed(_) => "Error creating a checkout session.".to_string(),
            Self::PaymentUnavailable(_) => "Payment provider temporarily unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
