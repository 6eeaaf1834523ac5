//! Store boundary used by the services.
//!
//! The services depend on [`CartStore`] and [`OrderStore`] only; the SeaORM
//! repositories below are the production implementations.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Cart, NewOrder, Order, OrderStatus};

pub mod cart_repository;
pub mod order_repository;

pub use cart_repository::CartRepository;
pub use order_repository::OrderRepository;

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Cart with its lines priced from the current catalogue.
    async fn fetch_with_items(&self, cart_id: Uuid) -> Result<Option<Cart>, ServiceError>;

    /// Removes every line from the cart. The cart itself is kept.
    async fn clear(&self, cart_id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order and its items atomically and assigns an id.
    async fn save(&self, order: NewOrder) -> Result<Order, ServiceError>;

    async fn delete(&self, order: &Order) -> Result<(), ServiceError>;

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Newest first.
    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError>;

    /// Sets `new` only if the stored status is still `expected`.
    /// Returns whether the row was updated.
    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, ServiceError>;
}

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}
