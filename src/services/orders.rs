use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::CustomerIdentity, errors::ServiceError, models::Order, repositories::OrderStore,
};

/// Read access to a customer's own orders
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// Orders placed by the caller, newest first
    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    pub async fn list_orders(&self, customer: &CustomerIdentity) -> Result<Vec<Order>, ServiceError> {
        self.orders.find_by_customer(customer.customer_id).await
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    pub async fn get_order(
        &self,
        customer: &CustomerIdentity,
        order_id: Uuid,
    ) -> Result<Order, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if !order.is_placed_by(customer.customer_id) {
            warn!(%order_id, "order requested by a different customer");
            return Err(ServiceError::Forbidden(
                "You don't have permission to access this order".to_string(),
            ));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOrder, OrderStatus};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::mock;
    use rust_decimal::Decimal;

    mock! {
        Orders {}

        #[async_trait]
        impl OrderStore for Orders {
            async fn save(&self, order: NewOrder) -> Result<Order, ServiceError>;
            async fn delete(&self, order: &Order) -> Result<(), ServiceError>;
            async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;
            async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError>;
            async fn compare_and_set_status(
                &self,
                order_id: Uuid,
                expected: OrderStatus,
                new: OrderStatus,
            ) -> Result<bool, ServiceError>;
        }
    }

    fn order_for(customer_id: Uuid) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id,
            status: OrderStatus::Pending,
            total_price: Decimal::ZERO,
            created_at: chrono::Utc::now(),
            items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn get_order_returns_own_order() {
        let caller = CustomerIdentity::new(Uuid::new_v4());
        let order = order_for(caller.customer_id);
        let expected = order.clone();
        let order_id = order.id;

        let mut store = MockOrders::new();
        store
            .expect_find_by_id()
            .withf(move |id| *id == order_id)
            .returning(move |_| Ok(Some(order.clone())));

        let service = OrderService::new(Arc::new(store));
        let found = service.get_order(&caller, expected.id).await.unwrap();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn get_order_of_someone_else_is_forbidden() {
        let caller = CustomerIdentity::new(Uuid::new_v4());
        let order = order_for(Uuid::new_v4());
        let id = order.id;

        let mut store = MockOrders::new();
        store
            .expect_find_by_id()
            .returning(move |_| Ok(Some(order.clone())));

        let service = OrderService::new(Arc::new(store));
        assert_matches!(
            service.get_order(&caller, id).await,
            Err(ServiceError::Forbidden(_))
        );
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let mut store = MockOrders::new();
        store.expect_find_by_id().returning(|_| Ok(None));

        let service = OrderService::new(Arc::new(store));
        let id = Uuid::new_v4();
        assert_matches!(
            service.get_order(&CustomerIdentity::new(Uuid::new_v4()), id).await,
            Err(ServiceError::OrderNotFound(missing)) if missing == id
        );
    }

    #[tokio::test]
    async fn list_orders_queries_by_caller() {
        let caller = CustomerIdentity::new(Uuid::new_v4());
        let customer_id = caller.customer_id;

        let mut store = MockOrders::new();
        store
            .expect_find_by_customer()
            .withf(move |id| *id == customer_id)
            .times(1)
            .returning(move |id| Ok(vec![order_for(id), order_for(id)]));

        let service = OrderService::new(Arc::new(store));
        let orders = service.list_orders(&caller).await.unwrap();
        assert_eq!(orders.len(), 2);
    }
}
