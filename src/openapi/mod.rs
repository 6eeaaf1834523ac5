use axum::{routing::get, Json, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Turns a customer's cart into an order, hands payment off to a hosted checkout
page and reconciles the order with the provider's webhook callbacks.

## Authentication

Customer endpoints require a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by the provider's signature header instead.

## Error Handling

Errors share one body format:

```json
{
  "error": "Bad Request",
  "message": "Cart 550e8400-e29b-41d4-a716-446655440000 is empty",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Checkout and payment callbacks"),
        (name = "Orders", description = "Order history")
    ),
    paths(
        crate::handlers::checkout::checkout,
        crate::handlers::checkout::payment_webhook,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
    ),
    components(
        schemas(
            crate::handlers::checkout::CheckoutRequest,
            crate::handlers::checkout::WebhookAck,
            crate::services::CheckoutResponse,
            crate::models::Order,
            crate::models::OrderItem,
            crate::models::OrderStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}
