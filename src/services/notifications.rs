use async_trait::async_trait;
use tracing::info;

use crate::entities::order::OrderWithItems;
use crate::errors::ServiceError;

/// Customer-facing notifications. Always best-effort: callers log a failure
/// and move on, a lost notification never fails payment processing.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_order_confirmation(&self, order: &OrderWithItems) -> Result<(), ServiceError>;
}

/// Logs the confirmation instead of delivering it. Email rendering and
/// transport live behind this trait in the wider system.
pub struct LogNotificationService;

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn send_order_confirmation(&self, order: &OrderWithItems) -> Result<(), ServiceError> {
        info!(
            order_id = %order.order.id,
            customer_email = %order.order.customer_email,
            total = %order.total(),
            "order confirmation notification"
        );
        Ok(())
    }
}
