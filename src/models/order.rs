use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::cart::Cart;

pub use crate::entities::order::OrderStatus;

/// How a requested status relates to the status an order already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// The move is allowed and changes the order.
    Apply,
    /// The order already has the requested status.
    AlreadyApplied,
    /// The move would leave a terminal state or go back to `Pending`.
    Conflict,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }

    pub fn transition_to(&self, target: OrderStatus) -> StatusTransition {
        if *self == target {
            return StatusTransition::AlreadyApplied;
        }
        match (self, target) {
            (OrderStatus::Pending, OrderStatus::Paid | OrderStatus::Failed) => {
                StatusTransition::Apply
            }
            _ => StatusTransition::Conflict,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of a cart line, priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// An order that has not been persisted yet and so has no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    /// Materializes a pending order from a cart snapshot.
    ///
    /// Items keep the cart's ordering. Prices are copied by value, so later
    /// product price changes never reach the order.
    pub fn from_cart(cart: &Cart, customer_id: Uuid) -> Self {
        let items = cart
            .items
            .iter()
            .map(|item| OrderItem {
                product_id: item.product.id,
                product_name: item.product.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.line_total(),
            })
            .collect();

        Self {
            customer_id,
            status: OrderStatus::Pending,
            total_price: cart.total_price(),
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn is_placed_by(&self, customer_id: Uuid) -> bool {
        self.customer_id == customer_id
    }
}
