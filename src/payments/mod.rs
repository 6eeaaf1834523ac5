//! Boundary to the external payment provider.
//!
//! The services only know [`PaymentGateway`]: create a hosted checkout
//! session for an order, and turn a signed webhook delivery into an optional
//! [`PaymentResult`].

pub mod stripe;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, OrderStatus};

pub use stripe::{StripeConfig, StripePaymentGateway};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("checkout session could not be created: {0}")]
    SessionCreation(String),
    #[error("Invalid Signature")]
    InvalidSignature,
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

/// Hosted payment page handed back to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Outcome of a verified webhook event for a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

/// Raw webhook delivery. The body must stay byte-exact for signature checks.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl WebhookRequest {
    pub fn new(headers: HeaderMap, payload: impl Into<Bytes>) -> Self {
        Self {
            headers,
            payload: payload.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Provider event types the reconciler reacts to. Everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    PaymentSucceeded,
    PaymentFailed,
    Other(String),
}

impl PaymentEventKind {
    pub fn resulting_status(&self) -> Option<OrderStatus> {
        match self {
            PaymentEventKind::PaymentSucceeded => Some(OrderStatus::Paid),
            PaymentEventKind::PaymentFailed => Some(OrderStatus::Failed),
            PaymentEventKind::Other(_) => None,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError>;

    /// Verifies the delivery and classifies it. `Ok(None)` means the event is
    /// authentic but irrelevant.
    fn parse_webhook_request(
        &self,
        request: &WebhookRequest,
    ) -> Result<Option<PaymentResult>, PaymentError>;
}
