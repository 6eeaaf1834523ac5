use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::OrderStatus;

/// Default capacity of the in-process event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Domain events emitted by checkout and payment reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        total_price: Decimal,
    },
    /// Compensating delete after the payment session could not be created
    OrderDeleted(Uuid),
    CartCleared(Uuid),
    CheckoutCompleted {
        order_id: Uuid,
        cart_id: Uuid,
        session_id: String,
    },
    CheckoutFailed {
        cart_id: Uuid,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    },
    /// A late or conflicting payment event left the order untouched
    StatusTransitionSkipped {
        order_id: Uuid,
        current: OrderStatus,
        requested: OrderStatus,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                customer_id,
                total_price,
            } => info!(%order_id, %customer_id, %total_price, "order created"),
            Event::OrderDeleted(order_id) => warn!(%order_id, "order deleted after failed checkout"),
            Event::CartCleared(cart_id) => info!(%cart_id, "cart cleared"),
            Event::CheckoutCompleted {
                order_id,
                cart_id,
                session_id,
            } => info!(%order_id, %cart_id, %session_id, "checkout completed"),
            Event::CheckoutFailed { cart_id, reason } => {
                warn!(%cart_id, %reason, "checkout failed")
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                at,
            } => info!(%order_id, %old_status, %new_status, %at, "order status changed"),
            Event::StatusTransitionSkipped {
                order_id,
                current,
                requested,
            } => warn!(%order_id, %current, %requested, "order status transition skipped"),
        }
    }

    info!("Event processing loop stopped");
}
