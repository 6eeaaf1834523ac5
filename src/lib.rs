//! Storefront API
//!
//! Checkout orchestration for a storefront: carts become orders, orders are
//! paid through a hosted payment page, and signed provider webhooks move
//! orders to their final status.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod payments;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::{AuthConfig, AuthService};
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::payments::PaymentGateway;
use crate::repositories::{CartRepository, OrderRepository};
use crate::services::{CheckoutService, OrderService};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires the database-backed stores and the payment gateway into the services.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let carts = Arc::new(CartRepository::new(db.clone()));
        let order_store = Arc::new(OrderRepository::new(db.clone()));

        let checkout = CheckoutService::new(
            carts,
            order_store.clone(),
            gateway,
            Arc::new(event_sender),
        );
        let auth = AuthService::new(AuthConfig::from(&config));

        Self {
            db,
            config: Arc::new(config),
            checkout: Arc::new(checkout),
            orders: Arc::new(OrderService::new(order_store)),
            auth: Arc::new(auth),
        }
    }
}

/// Versioned API. Everything except the provider webhook requires a bearer token.
pub fn api_v1_routes(state: &AppState) -> Router<Arc<AppState>> {
    let customer = Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(customer)
        .route(
            "/checkout/webhook",
            post(handlers::checkout::payment_webhook),
        )
}

/// Full application router without transport-specific layers such as CORS.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(&state))
        .nest("/health", health::health_routes(state.db.clone()))
        .merge(openapi::openapi_routes())
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(crate::tracing::configure_http_tracing())
        // Outermost, so the trace span already sees the request id
        .layer(middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
