pub mod checkout;
pub mod orders;

pub use checkout::{CheckoutResponse, CheckoutService, WebhookOutcome};
pub use orders::OrderService;
