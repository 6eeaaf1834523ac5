use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{BaseRepository, CartStore, Repository};
use crate::entities::{cart, cart_item, product};
use crate::errors::ServiceError;
use crate::models::{Cart, CartItem, ProductSummary};

/// SeaORM-backed cart store
#[derive(Debug, Clone)]
pub struct CartRepository {
    base: BaseRepository,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl CartStore for CartRepository {
    #[instrument(skip(self))]
    async fn fetch_with_items(&self, cart_id: Uuid) -> Result<Option<Cart>, ServiceError> {
        let db = self.base.get_db();

        if cart::Entity::find_by_id(cart_id).one(db).await?.is_none() {
            return Ok(None);
        }

        let rows = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(db)
            .await?;

        let items = rows
            .into_iter()
            .map(|(item, product)| {
                let product = product.ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "cart item {} references missing product {}",
                        item.id, item.product_id
                    ))
                })?;
                Ok(CartItem {
                    product: ProductSummary {
                        id: product.id,
                        name: product.name,
                    },
                    quantity: item.quantity,
                    unit_price: product.price,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        debug!(items = items.len(), "cart loaded");
        Ok(Some(Cart { id: cart_id, items }))
    }

    #[instrument(skip(self))]
    async fn clear(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let db = self.base.get_db();

        let removed = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(db)
            .await?
            .rows_affected;

        cart::Entity::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(db)
            .await?;

        debug!(removed, "cart cleared");
        Ok(())
    }
}
