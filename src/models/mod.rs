//! Domain types shared by the stores, the payment gateway and the services.

pub mod cart;
pub mod order;

pub use cart::{Cart, CartItem, ProductSummary};
pub use order::{NewOrder, Order, OrderItem, OrderStatus, StatusTransition};
