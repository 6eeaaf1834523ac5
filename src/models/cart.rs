use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
}

/// A cart line. `unit_price` is the product's price at the time the cart was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub product: ProductSummary,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_price(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(name: &str, quantity: i32, unit_price: Decimal) -> CartItem {
        CartItem {
            product: ProductSummary {
                id: Uuid::new_v4(),
                name: name.to_string(),
            },
            quantity,
            unit_price,
        }
    }

    #[test]
    fn totals_sum_line_totals() {
        let cart = Cart {
            id: Uuid::new_v4(),
            items: vec![item("A", 2, dec!(10.00)), item("B", 1, dec!(5.00))],
        };

        assert_eq!(cart.items[0].line_total(), dec!(20.00));
        assert_eq!(cart.total_price(), dec!(25.00));
        assert!(!cart.is_empty());
    }

    #[test]
    fn empty_cart_totals_zero() {
        let cart = Cart {
            id: Uuid::new_v4(),
            items: Vec::new(),
        };

        assert!(cart.is_empty());
        assert_eq!(cart.total_price(), Decimal::ZERO);
    }
}
