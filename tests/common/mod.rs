#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_api::{
    auth::CustomerIdentity,
    circuit_breaker::CircuitBreakerConfig,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{cart, cart_item, product},
    events::{self, EventSender},
    models::Order,
    payments::{
        CheckoutSession, PaymentError, PaymentGateway, PaymentResult, StripeConfig,
        StripePaymentGateway, WebhookRequest,
    },
    repositories::{CartRepository, OrderRepository},
    services::CheckoutService,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "Zq7vN2kLw9RtY4bXc8HmJ3sPd6FgA1eUo5KiT0nWyQrVxMzBlCjDhGfEuSaIpO8r";
pub const WEBHOOK_SECRET: &str = "whsec_test_storefront";

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, PaymentError>;
        fn parse_webhook_request(
            &self,
            request: &WebhookRequest,
        ) -> Result<Option<PaymentResult>, PaymentError>;
    }
}

/// Fresh migrated in-memory database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".into(),
        sqlx_logging: false,
        ..Default::default()
    })
    .await
    .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

/// Event sender whose events are drained and logged in the background.
pub fn event_sender() -> EventSender {
    let (sender, rx) = events::channel(256);
    tokio::spawn(events::process_events(rx));
    sender
}

pub fn checkout_service(
    db: &Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
) -> CheckoutService {
    CheckoutService::new(
        Arc::new(CartRepository::new(db.clone())),
        Arc::new(OrderRepository::new(db.clone())),
        gateway,
        Arc::new(event_sender()),
    )
}

pub async fn seed_product(db: &DatabaseConnection, name: &str, price: Decimal) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        price: Set(price),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed product")
}

/// Creates a cart holding `lines` in the given order.
pub async fn seed_cart(db: &DatabaseConnection, lines: &[(&product::Model, i32)]) -> Uuid {
    let now = Utc::now();
    let cart = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed cart");

    for (position, (product, quantity)) in lines.iter().enumerate() {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product.id),
            quantity: Set(*quantity),
            position: Set(position as i32),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed cart item");
    }

    cart.id
}

pub async fn cart_item_count(db: &DatabaseConnection, cart_id: Uuid) -> usize {
    cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(db)
        .await
        .expect("load cart items")
        .len()
}

pub async fn set_product_price(db: &DatabaseConnection, product: &product::Model, price: Decimal) {
    let mut active: product::ActiveModel = product.clone().into();
    active.price = Set(price);
    active.update(db).await.expect("update product price");
}

pub fn stripe_config(api_base: &str) -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_storefront".to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        api_base: api_base.trim_end_matches('/').to_string(),
        website_url: "https://shop.example.com".to_string(),
        currency: "usd".to_string(),
        webhook_tolerance_secs: 300,
        request_timeout: Duration::from_secs(5),
        breaker: CircuitBreakerConfig::default(),
    }
}

/// Stripe gateway for webhook-only tests; session calls go nowhere useful.
pub fn stripe_gateway() -> Arc<StripePaymentGateway> {
    Arc::new(
        StripePaymentGateway::new(stripe_config("http://127.0.0.1:9"))
            .expect("build stripe gateway"),
    )
}

/// A `payment_intent.*` event body for `order_id`.
pub fn payment_event(event_type: &str, order_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": "pi_test",
                "metadata": { "order_id": order_id.to_string() }
            }
        }
    }))
    .expect("serialize event")
}

pub fn signed_headers(payload: &[u8]) -> Vec<(String, String)> {
    vec![
        (
            "stripe-signature".to_string(),
            storefront_api::payments::stripe::signature_header(
                WEBHOOK_SECRET,
                Utc::now().timestamp(),
                payload,
            ),
        ),
        ("content-type".to_string(), "application/json".to_string()),
    ]
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Full router over an in-memory database with one authenticated customer.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub db: Arc<DatabaseConnection>,
    pub customer: CustomerIdentity,
    token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(stripe_gateway()).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let db = test_db().await;
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.payment_webhook_secret = WEBHOOK_SECRET.to_string();

        let state = Arc::new(AppState::new(db.clone(), cfg, gateway, event_sender()));
        let customer = CustomerIdentity::new(Uuid::new_v4());
        let token = state
            .auth
            .issue_token(customer.customer_id)
            .expect("issue test token");

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            db,
            customer,
            token,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Token for a different customer than [`TestApp::customer`].
    pub fn other_token(&self) -> String {
        self.state
            .auth
            .issue_token(Uuid::new_v4())
            .expect("issue test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(String, String)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = body.map(Body::from).unwrap_or_else(Body::empty);

        self.router
            .clone()
            .oneshot(builder.body(body).expect("failed to build request"))
            .await
            .expect("router error during test request")
    }

    pub async fn request_as(
        &self,
        token: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let mut headers = vec![("authorization".to_string(), format!("Bearer {}", token))];
        let body = body.map(|json| {
            headers.push(("content-type".to_string(), "application/json".to_string()));
            serde_json::to_vec(&json).expect("failed to serialize json request body")
        });
        self.request(method, uri, body, &headers).await
    }

    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.request_as(self.token(), method, uri, body).await
    }
}
