use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::OrderRepository;
use crate::entities::order::{self, Entity as OrderEntity, OrderWithItems};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::ServiceError;

pub struct SqlOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SqlOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderRepository for SqlOrderRepository {
    #[instrument(skip(self), fields(order_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = OrderEntity::find_by_id(id).one(&*self.db).await? else {
            return Ok(None);
        };
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(&*self.db)
            .await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    #[instrument(skip_all, fields(order_id = %order.id))]
    async fn insert(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let order_active = order::ActiveModel {
            id: Set(order.id),
            customer_id: Set(order.customer_id),
            customer_email: Set(order.customer_email.clone()),
            currency: Set(order.currency.clone()),
            shipping_cost: Set(order.shipping_cost),
            shipping_address: Set(order.shipping_address.clone()),
            shipping_service: Set(order.shipping_service.clone()),
            shipping_days: Set(order.shipping_days),
            status: Set(order.status),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
            version: Set(order.version),
        };
        let inserted = order_active.insert(&txn).await?;

        let mut inserted_items = Vec::with_capacity(items.len());
        for item in items {
            let item_active = order_item::ActiveModel {
                id: Set(item.id),
                order_id: Set(item.order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
            };
            inserted_items.push(item_active.insert(&txn).await?);
        }

        txn.commit().await?;
        Ok(OrderWithItems {
            order: inserted,
            items: inserted_items,
        })
    }

    #[instrument(skip_all, fields(order_id = %order.id, status = %order.status))]
    async fn update(&self, order: &order::Model) -> Result<(), ServiceError> {
        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(order.status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(order.version + 1);
        active.update(&*self.db).await?;
        Ok(())
    }
}
