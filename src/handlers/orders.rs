use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::CustomerIdentity,
    errors::{ErrorResponse, ServiceError},
    handlers::common::map_path_rejection,
    models::Order,
    AppState,
};

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    responses(
        (status = 200, description = "Orders placed by the caller, newest first", body = [Order]),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<Json<Vec<Order>>, ServiceError> {
    Ok(Json(state.orders.list_orders(&identity).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = Order),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Order belongs to another customer", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Order>, ServiceError> {
    let Path(order_id) = id.map_err(map_path_rejection)?;
    Ok(Json(state.orders.get_order(&identity, order_id).await?))
}
