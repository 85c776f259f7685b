use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::entities::order::OrderWithItems;
use crate::entities::{order, order_item, payment_request};
use crate::errors::ServiceError;

pub mod memory;
pub mod orders;
pub mod payment_requests;

pub use orders::SqlOrderRepository;
pub use payment_requests::SqlPaymentRequestRepository;

/// Order store. Absent rows are `Ok(None)`, never an error.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError>;

    /// Persists a new order together with its (append-only) items.
    async fn insert(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError>;

    async fn update(&self, order: &order::Model) -> Result<(), ServiceError>;
}

/// PaymentRequest store. Every write persists synchronously; requests are
/// kept forever for audit.
#[async_trait]
pub trait PaymentRequestRepository: Send + Sync {
    async fn create(
        &self,
        request: payment_request::Model,
    ) -> Result<payment_request::Model, ServiceError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<payment_request::Model>, ServiceError>;

    async fn update(&self, request: &payment_request::Model) -> Result<(), ServiceError>;

    /// Pending requests, oldest first.
    async fn list_pending(&self) -> Result<Vec<payment_request::Model>, ServiceError>;

    /// Failed requests still under the retry cap and older than the
    /// cooldown window, oldest first.
    async fn list_failed_eligible_for_retry(
        &self,
        cooldown: Duration,
    ) -> Result<Vec<payment_request::Model>, ServiceError>;

    /// Newest Pending or Processing request for an order, if any.
    async fn find_active_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment_request::Model>, ServiceError>;
}
