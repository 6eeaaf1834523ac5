use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::CustomerIdentity,
    errors::{ErrorResponse, ServiceError},
    handlers::common::{map_json_rejection, success_response},
    payments::WebhookRequest,
    services::{CheckoutResponse, WebhookOutcome},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub cart_id: Uuid,
}

/// Body returned to the payment provider for every accepted delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// Whether this delivery changed an order
    pub applied: bool,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            received: true,
            applied: matches!(outcome, WebhookOutcome::Applied),
        }
    }
}

/// Place an order for a cart and open a payment session
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout cart",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order placed; redirect the customer to checkout_url", body = CheckoutResponse),
        (status = 400, description = "Cart not found or empty", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 500, description = "Payment session could not be created", body = ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(request) = payload.map_err(map_json_rejection)?;

    let response = state.checkout.checkout(&identity, request.cart_id).await?;
    Ok(success_response(response))
}

/// Payment provider callback
///
/// Deliveries for unknown orders are acknowledged so the provider stops
/// retrying them.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/webhook",
    summary = "Payment webhook",
    request_body(content = String, description = "Raw provider event", content_type = "application/json"),
    params(("stripe-signature" = String, Header, description = "Provider signature")),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature or malformed event", body = ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    match state
        .checkout
        .handle_webhook_event(WebhookRequest::new(headers, body))
        .await
    {
        Ok(outcome) => Ok(Json(WebhookAck::from(outcome))),
        Err(ServiceError::OrderNotFound(order_id)) => {
            warn!(%order_id, "acknowledging webhook for unknown order");
            Ok(Json(WebhookAck {
                received: true,
                applied: false,
            }))
        }
        Err(e) => Err(e),
    }
}
