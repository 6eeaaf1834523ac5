use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{BaseRepository, OrderStore, Repository};
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::models::{NewOrder, Order, OrderItem, OrderStatus};

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    async fn items_for(
        &self,
        order_ids: Vec<Uuid>,
    ) -> Result<HashMap<Uuid, Vec<OrderItem>>, ServiceError> {
        let rows = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::Position)
            .all(self.base.get_db())
            .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(OrderItem {
                product_id: row.product_id,
                product_name: row.product_name,
                quantity: row.quantity,
                unit_price: row.unit_price,
                total_price: row.total_price,
            });
        }
        Ok(grouped)
    }
}

fn to_domain(model: order::Model, items: Vec<OrderItem>) -> Order {
    Order {
        id: model.id,
        customer_id: model.customer_id,
        status: model.status,
        total_price: model.total_price,
        created_at: model.created_at,
        items,
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    #[instrument(skip(self, new_order), fields(customer_id = %new_order.customer_id))]
    async fn save(&self, new_order: NewOrder) -> Result<Order, ServiceError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.base.get_db().begin().await?;

        order::Entity::insert(order::ActiveModel {
            id: Set(id),
            customer_id: Set(new_order.customer_id),
            status: Set(new_order.status),
            total_price: Set(new_order.total_price),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .exec_without_returning(&txn)
        .await?;

        if !new_order.items.is_empty() {
            let rows = new_order
                .items
                .iter()
                .enumerate()
                .map(|(position, item)| order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(id),
                    product_id: Set(item.product_id),
                    product_name: Set(item.product_name.clone()),
                    position: Set(position as i32),
                    quantity: Set(item.quantity),
                    unit_price: Set(item.unit_price),
                    total_price: Set(item.total_price),
                });
            order_item::Entity::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        debug!(order_id = %id, items = new_order.items.len(), "order saved");

        Ok(Order {
            id,
            customer_id: new_order.customer_id,
            status: new_order.status,
            total_price: new_order.total_price,
            created_at: now,
            items: new_order.items,
        })
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn delete(&self, order: &Order) -> Result<(), ServiceError> {
        let txn = self.base.get_db().begin().await?;

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order.id).exec(&txn).await?;

        txn.commit().await?;
        debug!("order deleted");
        Ok(())
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        let Some(model) = order::Entity::find_by_id(order_id)
            .one(self.base.get_db())
            .await?
        else {
            return Ok(None);
        };

        let items = self
            .items_for(vec![order_id])
            .await?
            .remove(&order_id)
            .unwrap_or_default();
        Ok(Some(to_domain(model, items)))
    }

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let models = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(self.base.get_db())
            .await?;
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let mut items = self
            .items_for(models.iter().map(|m| m.id).collect())
            .await?;

        Ok(models
            .into_iter()
            .map(|model| {
                let lines = items.remove(&model.id).unwrap_or_default();
                to_domain(model, lines)
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(expected))
            .exec(self.base.get_db())
            .await?;

        Ok(result.rows_affected == 1)
    }
}
