use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::CustomerIdentity,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{NewOrder, Order, OrderStatus, StatusTransition},
    payments::{PaymentError, PaymentGateway, PaymentResult, WebhookRequest},
    repositories::{CartStore, OrderStore},
};

/// A lost compare-and-set is re-read once; after that the order is terminal.
const MAX_STATUS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    /// Hosted payment page the customer is redirected to
    pub checkout_url: String,
}

/// What a webhook delivery did to the order it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Authentic event of a kind that does not affect orders
    Ignored,
    Applied,
    /// Duplicate delivery; the order already had the requested status
    AlreadyApplied,
    /// Late or conflicting event that would have left a terminal state
    Skipped {
        current: OrderStatus,
        requested: OrderStatus,
    },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::AlreadyApplied => "already_applied",
            WebhookOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Turns carts into orders and payment events into order status changes
#[derive(Clone)]
pub struct CheckoutService {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        carts: Arc<dyn CartStore>,
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            carts,
            orders,
            gateway,
            event_sender,
        }
    }

    /// Places an order for the cart and opens a payment session for it.
    ///
    /// The order is committed before the provider is called so its id can
    /// travel in the session metadata. If the provider fails, the order is
    /// deleted again and the cart is left as it was.
    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    pub async fn checkout(
        &self,
        customer: &CustomerIdentity,
        cart_id: Uuid,
    ) -> Result<CheckoutResponse, ServiceError> {
        let cart = self
            .carts
            .fetch_with_items(cart_id)
            .await?
            .ok_or(ServiceError::CartNotFound(cart_id))?;

        if cart.is_empty() {
            counter!("storefront_checkout_total", 1, "outcome" => "cart_empty");
            return Err(ServiceError::CartEmpty(cart_id));
        }

        let order = self
            .orders
            .save(NewOrder::from_cart(&cart, customer.customer_id))
            .await?;
        info!(order_id = %order.id, total = %order.total_price, "order created from cart");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                customer_id: order.customer_id,
                total_price: order.total_price,
            })
            .await;

        let session = match self.gateway.create_checkout_session(&order).await {
            Ok(session) => session,
            Err(err) => {
                self.compensate(&order, cart_id, &err).await;
                return Err(err.into());
            }
        };

        self.carts.clear(cart_id).await?;
        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                order_id: order.id,
                cart_id,
                session_id: session.id.clone(),
            })
            .await;
        counter!("storefront_checkout_total", 1, "outcome" => "success");

        Ok(CheckoutResponse {
            order_id: order.id,
            checkout_url: session.url,
        })
    }

    async fn compensate(&self, order: &Order, cart_id: Uuid, cause: &PaymentError) {
        warn!(order_id = %order.id, error = %cause, "payment session failed, deleting order");
        counter!("storefront_checkout_total", 1, "outcome" => "payment_failed");

        match self.orders.delete(order).await {
            Ok(()) => {
                self.event_sender
                    .send_or_log(Event::OrderDeleted(order.id))
                    .await
            }
            Err(e) => error!(
                order_id = %order.id,
                error = %e,
                "compensating delete failed; order left pending"
            ),
        }

        self.event_sender
            .send_or_log(Event::CheckoutFailed {
                cart_id,
                reason: cause.to_string(),
            })
            .await;
    }

    /// Verifies a provider callback and applies the payment outcome it reports.
    #[instrument(skip(self, request))]
    pub async fn handle_webhook_event(
        &self,
        request: WebhookRequest,
    ) -> Result<WebhookOutcome, ServiceError> {
        let result = match self.gateway.parse_webhook_request(&request) {
            Ok(Some(result)) => result,
            Ok(None) => {
                counter!("storefront_webhook_total", 1, "outcome" => "ignored");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(PaymentError::InvalidSignature) => {
                warn!("webhook rejected: signature verification failed");
                counter!("storefront_webhook_total", 1, "outcome" => "invalid_signature");
                return Err(ServiceError::InvalidSignature);
            }
            Err(e) => {
                warn!(error = %e, "webhook rejected");
                counter!("storefront_webhook_total", 1, "outcome" => "rejected");
                return Err(e.into());
            }
        };

        self.apply_payment_result(result).await
    }

    /// Moves the order to the reported status unless that would leave a
    /// terminal state. Safe under duplicate and concurrent delivery.
    #[instrument(skip(self), fields(order_id = %result.order_id, requested = %result.status))]
    pub async fn apply_payment_result(
        &self,
        result: PaymentResult,
    ) -> Result<WebhookOutcome, ServiceError> {
        let mut order = self.load_for_reconciliation(result.order_id).await?;

        for _ in 0..MAX_STATUS_ATTEMPTS {
            let outcome = match order.status.transition_to(result.status) {
                StatusTransition::AlreadyApplied => {
                    info!("payment result already applied");
                    WebhookOutcome::AlreadyApplied
                }
                StatusTransition::Conflict => {
                    warn!(current = %order.status, "skipping conflicting payment result");
                    self.event_sender
                        .send_or_log(Event::StatusTransitionSkipped {
                            order_id: order.id,
                            current: order.status,
                            requested: result.status,
                        })
                        .await;
                    WebhookOutcome::Skipped {
                        current: order.status,
                        requested: result.status,
                    }
                }
                StatusTransition::Apply => {
                    let updated = self
                        .orders
                        .compare_and_set_status(order.id, order.status, result.status)
                        .await?;
                    if !updated {
                        // Another delivery changed the status first.
                        order = self.load_for_reconciliation(result.order_id).await?;
                        continue;
                    }

                    info!(from = %order.status, "order status updated");
                    self.event_sender
                        .send_or_log(Event::OrderStatusChanged {
                            order_id: order.id,
                            old_status: order.status,
                            new_status: result.status,
                            at: chrono::Utc::now(),
                        })
                        .await;
                    WebhookOutcome::Applied
                }
            };

            counter!("storefront_webhook_total", 1, "outcome" => outcome.label());
            return Ok(outcome);
        }

        Err(ServiceError::InternalError(format!(
            "status of order {} kept changing during reconciliation",
            result.order_id
        )))
    }

    async fn load_for_reconciliation(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.orders.find_by_id(order_id).await?.ok_or_else(|| {
            error!(%order_id, "payment event references unknown order");
            counter!("storefront_webhook_total", 1, "outcome" => "order_not_found");
            ServiceError::OrderNotFound(order_id)
        })
    }
}
