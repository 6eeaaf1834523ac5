//! Property-based tests for order materialization.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::models::{Cart, CartItem, NewOrder, OrderStatus, ProductSummary};
use uuid::Uuid;

fn cart_item_strategy() -> impl Strategy<Value = CartItem> {
    ("[a-zA-Z ]{1,24}", 1i32..=50, 1i64..=1_000_000).prop_map(|(name, quantity, cents)| CartItem {
        product: ProductSummary {
            id: Uuid::new_v4(),
            name,
        },
        quantity,
        unit_price: Decimal::new(cents, 2),
    })
}

fn cart_strategy() -> impl Strategy<Value = Cart> {
    prop::collection::vec(cart_item_strategy(), 1..12).prop_map(|items| Cart {
        id: Uuid::new_v4(),
        items,
    })
}

proptest! {
    #[test]
    fn order_total_is_sum_of_line_totals(cart in cart_strategy()) {
        let order = NewOrder::from_cart(&cart, Uuid::new_v4());

        let sum: Decimal = order.items.iter().map(|item| item.total_price).sum();
        prop_assert_eq!(order.total_price, sum);
        prop_assert_eq!(order.total_price, cart.total_price());
    }

    #[test]
    fn each_line_is_priced_from_its_cart_item(cart in cart_strategy()) {
        let order = NewOrder::from_cart(&cart, Uuid::new_v4());

        prop_assert_eq!(order.items.len(), cart.items.len());
        for (line, item) in order.items.iter().zip(cart.items.iter()) {
            prop_assert_eq!(line.product_id, item.product.id);
            prop_assert_eq!(&line.product_name, &item.product.name);
            prop_assert_eq!(line.quantity, item.quantity);
            prop_assert_eq!(line.unit_price, item.unit_price);
            prop_assert_eq!(line.total_price, item.unit_price * Decimal::from(item.quantity));
        }
    }

    #[test]
    fn new_orders_start_pending_for_the_caller(cart in cart_strategy()) {
        let customer = Uuid::new_v4();
        let order = NewOrder::from_cart(&cart, customer);

        prop_assert_eq!(order.status, OrderStatus::Pending);
        prop_assert_eq!(order.customer_id, customer);
        prop_assert!(order.total_price > Decimal::ZERO);
    }
}
