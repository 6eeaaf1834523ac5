use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    CheckoutSession, PaymentError, PaymentEventKind, PaymentGateway, PaymentResult,
    WebhookRequest,
};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::config::AppConfig;
use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Timestamps this far in the future are still accepted.
const FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub website_url: String,
    pub currency: String,
    pub webhook_tolerance_secs: i64,
    pub request_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl From<&AppConfig> for StripeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.payment_webhook_secret.clone(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            website_url: config.website_url.trim_end_matches('/').to_string(),
            currency: config.payment_currency.to_lowercase(),
            webhook_tolerance_secs: i64::try_from(config.payment_webhook_tolerance_secs)
                .unwrap_or(i64::MAX),
            request_timeout: Duration::from_secs(config.payment_request_timeout_secs),
            breaker: CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                timeout: Duration::from_secs(config.circuit_breaker_timeout_secs),
                success_threshold: 1,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<&str> for PaymentEventKind {
    fn from(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => PaymentEventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => PaymentEventKind::PaymentFailed,
            other => PaymentEventKind::Other(other.to_string()),
        }
    }
}

/// Stripe Checkout integration.
#[derive(Debug)]
pub struct StripePaymentGateway {
    client: Client,
    config: StripeConfig,
    breaker: CircuitBreaker,
}

impl StripePaymentGateway {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::SessionCreation(format!("http client: {}", e)))?;
        let breaker = CircuitBreaker::new("stripe", config.breaker.clone());

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    /// Form fields for `POST /v1/checkout/sessions`.
    ///
    /// The order id goes into both the session and the payment intent
    /// metadata; `payment_intent.*` events only carry the latter.
    fn session_form(&self, order: &Order) -> Vec<(String, String)> {
        let order_id = order.id.to_string();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                format!(
                    "{}/checkout-success?orderId={}",
                    self.config.website_url, order_id
                ),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/checkout-cancel", self.config.website_url),
            ),
            ("metadata[order_id]".to_string(), order_id.clone()),
            (
                "payment_intent_data[metadata][order_id]".to_string(),
                order_id,
            ),
        ];

        for (i, item) in order.items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            let minor_units = (item.unit_price * Decimal::ONE_HUNDRED).normalize();
            form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
            form.push((
                format!("{prefix}[price_data][currency]"),
                self.config.currency.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][unit_amount_decimal]"),
                minor_units.to_string(),
            ));
            form.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.product_name.clone(),
            ));
        }

        form
    }

    async fn post_session(&self, form: &[(String, String)]) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.config.api_base))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| PaymentError::SessionCreation(format!("Stripe API error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::SessionCreation(format!(
                "Stripe API returned {}: {}",
                status, body
            )));
        }

        let session: CreateCheckoutSessionResponse = response.json().await.map_err(|e| {
            PaymentError::SessionCreation(format!("Failed to parse Stripe response: {}", e))
        })?;
        let url = session.url.ok_or_else(|| {
            PaymentError::SessionCreation(format!("session {} has no redirect url", session.id))
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    /// Checks a `stripe-signature` header (`t=<unix>,v1=<hex>[,v1=...]`)
    /// against `payload` as of `now`.
    pub fn verify_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<(), PaymentError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            if let Some(t) = part.trim().strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.trim().strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        let timestamp_str = timestamp.ok_or(PaymentError::InvalidSignature)?;
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| PaymentError::InvalidSignature)?;

        let age = now
            .checked_sub(timestamp)
            .ok_or(PaymentError::InvalidSignature)?;
        if age > self.config.webhook_tolerance_secs || age < -FUTURE_SKEW_SECS {
            warn!(age, "Stripe webhook timestamp outside tolerance");
            return Err(PaymentError::InvalidSignature);
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| PaymentError::InvalidSignature)?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures
            .iter()
            .filter_map(|s| hex::decode(s).ok())
            .any(|expected| mac.clone().verify_slice(&expected).is_ok());

        if matched {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }

    fn classify_event(payload: &[u8]) -> Result<Option<PaymentResult>, PaymentError> {
        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedEvent(e.to_string()))?;

        let kind = PaymentEventKind::from(event.event_type.as_str());
        let Some(status) = kind.resulting_status() else {
            debug!(event_type = %event.event_type, "ignoring Stripe event");
            return Ok(None);
        };

        let order_id = event
            .data
            .object
            .metadata
            .get("order_id")
            .ok_or_else(|| {
                PaymentError::MalformedEvent(format!(
                    "event {} has no order_id metadata",
                    event.id.as_deref().unwrap_or("<unknown>")
                ))
            })?;
        let order_id = Uuid::parse_str(order_id)
            .map_err(|_| PaymentError::MalformedEvent(format!("invalid order_id {}", order_id)))?;

        Ok(Some(PaymentResult { order_id, status }))
    }
}

#[async_trait]
impl PaymentGateway for StripePaymentGateway {
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError> {
        let form = self.session_form(order);

        self.breaker
            .call(|| self.post_session(&form))
            .await
            .map_err(|err| match err {
                CircuitBreakerError::Open => {
                    PaymentError::Unavailable("Stripe circuit breaker is open".to_string())
                }
                CircuitBreakerError::Inner(e) => e,
            })
    }

    fn parse_webhook_request(
        &self,
        request: &WebhookRequest,
    ) -> Result<Option<PaymentResult>, PaymentError> {
        let header = request
            .header(SIGNATURE_HEADER)
            .ok_or(PaymentError::InvalidSignature)?;
        self.verify_signature_at(&request.payload, header, chrono::Utc::now().timestamp())?;

        Self::classify_event(&request.payload)
    }
}

/// Builds a `stripe-signature` header value, as Stripe would send it.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderItem, OrderStatus};
    use assert_matches::assert_matches;
    use axum::http::{HeaderMap, HeaderValue};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_test";

    fn config(api_base: &str) -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: SECRET.into(),
            api_base: api_base.into(),
            website_url: "https://shop.example".into(),
            currency: "usd".into(),
            webhook_tolerance_secs: 300,
            request_timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
        }
    }

    fn gateway() -> StripePaymentGateway {
        StripePaymentGateway::new(config("http://127.0.0.1:1")).unwrap()
    }

    fn order() -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            total_price: dec!(25.00),
            created_at: chrono::Utc::now(),
            items: vec![
                OrderItem {
                    product_id: Uuid::new_v4(),
                    product_name: "productA".into(),
                    quantity: 2,
                    unit_price: dec!(10.00),
                    total_price: dec!(20.00),
                },
                OrderItem {
                    product_id: Uuid::new_v4(),
                    product_name: "productB".into(),
                    quantity: 1,
                    unit_price: dec!(5.50),
                    total_price: dec!(5.50),
                },
            ],
        }
    }

    fn event(event_type: &str, order_id: Option<&str>) -> String {
        let metadata = match order_id {
            Some(id) => serde_json::json!({ "order_id": id }),
            None => serde_json::json!({}),
        };
        serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": { "id": "pi_1", "metadata": metadata } }
        })
        .to_string()
    }

    fn signed_request(payload: &str) -> WebhookRequest {
        let mut headers = HeaderMap::new();
        let value = signature_header(SECRET, chrono::Utc::now().timestamp(), payload.as_bytes());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&value).unwrap());
        WebhookRequest::new(headers, payload.to_string())
    }

    #[test]
    fn session_form_carries_order_metadata_and_line_items() {
        let order = order();
        let form: HashMap<String, String> = gateway().session_form(&order).into_iter().collect();

        assert_eq!(form["mode"], "payment");
        assert_eq!(
            form["success_url"],
            format!("https://shop.example/checkout-success?orderId={}", order.id)
        );
        assert_eq!(form["cancel_url"], "https://shop.example/checkout-cancel");
        assert_eq!(form["metadata[order_id]"], order.id.to_string());
        assert_eq!(
            form["payment_intent_data[metadata][order_id]"],
            order.id.to_string()
        );
        assert_eq!(form["line_items[0][quantity]"], "2");
        assert_eq!(form["line_items[0][price_data][unit_amount_decimal]"], "1000");
        assert_eq!(form["line_items[1][price_data][unit_amount_decimal]"], "550");
        assert_eq!(form["line_items[1][price_data][product_data][name]"], "productB");
        assert_eq!(form["line_items[1][price_data][currency]"], "usd");
    }

    #[test]
    fn valid_signature_is_accepted() {
        let gateway = gateway();
        let payload = b"{\"type\":\"ping\"}";
        let now = 1_700_000_000;
        let header = signature_header(SECRET, now, payload);

        assert!(gateway.verify_signature_at(payload, &header, now + 10).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let gateway = gateway();
        let now = 1_700_000_000;
        let header = signature_header(SECRET, now, b"original");

        assert_matches!(
            gateway.verify_signature_at(b"tampered", &header, now),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_secret_and_garbage_headers_are_rejected() {
        let gateway = gateway();
        let now = 1_700_000_000;
        let payload = b"{}";

        let foreign = signature_header("whsec_other", now, payload);
        assert!(gateway.verify_signature_at(payload, &foreign, now).is_err());
        assert!(gateway.verify_signature_at(payload, "v1=abcd", now).is_err());
        assert!(gateway.verify_signature_at(payload, "t=abc,v1=abcd", now).is_err());
        assert!(gateway
            .verify_signature_at(payload, &format!("t={},v1=zz", now), now)
            .is_err());
    }

    #[test]
    fn stale_and_future_timestamps_are_rejected() {
        let gateway = gateway();
        let payload = b"{}";
        let signed_at = 1_700_000_000;
        let header = signature_header(SECRET, signed_at, payload);

        assert!(gateway
            .verify_signature_at(payload, &header, signed_at + 301)
            .is_err());
        assert!(gateway
            .verify_signature_at(payload, &header, signed_at - 61)
            .is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        let gateway = gateway();
        let payload = b"{}";
        let now = 1_700_000_000;

        for header in [
            format!("t={},v1=00", i64::MIN),
            format!("t={},v1=00", i64::MAX),
        ] {
            assert_matches!(
                gateway.verify_signature_at(payload, &header, now),
                Err(PaymentError::InvalidSignature)
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_static("t=-9223372036854775808,v1=00"),
        );
        let request = WebhookRequest::new(headers, payload.to_vec());
        assert_matches!(
            gateway.parse_webhook_request(&request),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn oversized_tolerance_saturates_instead_of_wrapping() {
        let mut app_config = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            "test".into(),
        );
        app_config.payment_webhook_tolerance_secs = u64::MAX;

        let config = StripeConfig::from(&app_config);
        assert_eq!(config.webhook_tolerance_secs, i64::MAX);
    }

    #[test]
    fn any_matching_v1_signature_is_enough() {
        let gateway = gateway();
        let now = 1_700_000_000;
        let payload = b"{}";
        let good = signature_header(SECRET, now, payload);
        let header = format!("{},v1={}", good, "00".repeat(32));

        assert!(gateway.verify_signature_at(payload, &header, now).is_ok());
    }

    #[test]
    fn classifies_known_event_kinds() {
        let gateway = gateway();
        let order_id = Uuid::new_v4();

        let paid = gateway
            .parse_webhook_request(&signed_request(&event(
                "payment_intent.succeeded",
                Some(&order_id.to_string()),
            )))
            .unwrap();
        assert_eq!(
            paid,
            Some(PaymentResult {
                order_id,
                status: OrderStatus::Paid
            })
        );

        let failed = gateway
            .parse_webhook_request(&signed_request(&event(
                "payment_intent.payment_failed",
                Some(&order_id.to_string()),
            )))
            .unwrap();
        assert_eq!(failed.map(|r| r.status), Some(OrderStatus::Failed));
    }

    #[test]
    fn unknown_event_kinds_are_ignored() {
        let result = gateway()
            .parse_webhook_request(&signed_request(&event("charge.refunded", None)))
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn missing_or_bad_order_id_is_malformed() {
        let gateway = gateway();

        assert_matches!(
            gateway.parse_webhook_request(&signed_request(&event(
                "payment_intent.succeeded",
                None
            ))),
            Err(PaymentError::MalformedEvent(_))
        );
        assert_matches!(
            gateway.parse_webhook_request(&signed_request(&event(
                "payment_intent.succeeded",
                Some("not-a-uuid")
            ))),
            Err(PaymentError::MalformedEvent(_))
        );
        assert_matches!(
            gateway.parse_webhook_request(&signed_request("not json")),
            Err(PaymentError::MalformedEvent(_))
        );
    }

    #[test]
    fn missing_signature_header_is_rejected_before_parsing() {
        let request = WebhookRequest::new(HeaderMap::new(), "not json");
        assert_matches!(
            gateway().parse_webhook_request(&request),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn creates_checkout_session_against_api() {
        let server = MockServer::start().await;
        let order = order();
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Basic c2tfdGVzdDo="))
            .and(body_string_contains(&format!(
                "metadata%5Border_id%5D={}",
                order.id
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripePaymentGateway::new(config(&server.uri())).unwrap();
        let session = gateway.create_checkout_session(&order).await.unwrap();

        assert_eq!(session.id, "cs_test_1");
        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_1");
    }

    #[tokio::test]
    async fn api_error_fails_session_then_opens_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(402).set_body_string("card_declined"))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripePaymentGateway::new(config(&server.uri())).unwrap();

        assert_matches!(
            gateway.create_checkout_session(&order()).await,
            Err(PaymentError::SessionCreation(msg)) if msg.contains("card_declined")
        );
        assert_matches!(
            gateway.create_checkout_session(&order()).await,
            Err(PaymentError::Unavailable(_))
        );
    }
}
