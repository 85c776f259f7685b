use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::{self, OrderStatus, OrderWithItems};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::messaging::MessagePublisher;
use crate::repositories::OrderRepository;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(email(message = "Customer email must be valid"))]
    pub customer_email: String,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<NewOrderItem>,
    pub shipping_cost: Decimal,
    pub shipping_address: Option<String>,
    pub shipping_service: Option<String>,
    pub shipping_days: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub product_name: String,
    pub unit_price: Decimal,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

/// Creates orders with their append-only item lists and announces them on
/// the `order-created` queue.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    publisher: Arc<MessagePublisher>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepository>, publisher: Arc<MessagePublisher>) -> Self {
        Self { orders, publisher }
    }

    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        if request.shipping_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Shipping cost cannot be negative".to_string(),
            ));
        }
        if request.items.iter().any(|item| item.unit_price < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "Item price cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::Model {
            id: order_id,
            customer_id: request.customer_id,
            customer_email: request.customer_email,
            currency: request.currency,
            shipping_cost: request.shipping_cost,
            shipping_address: request.shipping_address,
            shipping_service: request.shipping_service,
            shipping_days: request.shipping_days,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: Some(now),
            version: 1,
        };
        let items = request
            .items
            .into_iter()
            .map(|item| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.product_id,
                product_name: item.product_name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();

        let aggregate = self.orders.insert(order, items).await?;
        info!(order_id = %order_id, total = %aggregate.total(), "order created");

        // Best-effort announcement; order creation never rolls back because
        // a notification could not be queued.
        if let Err(err) = self.publisher.publish_order_created(order_id).await {
            warn!(order_id = %order_id, error = %err, "failed to publish order-created message");
        }

        Ok(aggregate)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        self.orders.get_by_id(order_id).await
    }
}
