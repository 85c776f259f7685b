use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    Message, MessageChannel, OrderCreatedMessage, PaymentRequestMessage, ORDER_CREATED_QUEUE,
    PAYMENT_REQUESTS_QUEUE,
};
use crate::errors::ServiceError;
use crate::repositories::{OrderRepository, PaymentRequestRepository};

/// Turns durable records into queue messages. Envelopes are built from the
/// stored row, not caller state, so a republish always reflects the latest
/// retry count.
pub struct MessagePublisher {
    channel: Arc<dyn MessageChannel>,
    payment_requests: Arc<dyn PaymentRequestRepository>,
    orders: Arc<dyn OrderRepository>,
}

impl MessagePublisher {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        payment_requests: Arc<dyn PaymentRequestRepository>,
        orders: Arc<dyn OrderRepository>,
    ) -> Self {
        Self {
            channel,
            payment_requests,
            orders,
        }
    }

    /// Publishes a payment request snapshot to `payment-requests`. A
    /// missing record is logged and skipped, not an error.
    #[instrument(skip(self), fields(payment_request_id = %payment_request_id))]
    pub async fn publish_payment_request(
        &self,
        payment_request_id: Uuid,
    ) -> Result<(), ServiceError> {
        let Some(request) = self.payment_requests.get_by_id(payment_request_id).await? else {
            warn!("payment request not found; nothing to publish");
            return Ok(());
        };

        let envelope = PaymentRequestMessage {
            payment_request_id: request.id,
            order_id: request.order_id,
            amount: request.amount,
            payment_method: request.payment_method.clone(),
            customer_email: request.customer_email.clone(),
            retry_count: request.retry_count,
            requested_at: request.created_at,
        };
        let message = Message::json(&envelope)?;

        self.publish_with_reconnect(PAYMENT_REQUESTS_QUEUE, message)
            .await?;
        Ok(())
    }

    /// Publishes an order summary to `order-created`. Callers treat this as
    /// best-effort and swallow the error.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn publish_order_created(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let Some(aggregate) = self.orders.get_by_id(order_id).await? else {
            warn!("order not found; nothing to publish");
            return Ok(());
        };

        let envelope = OrderCreatedMessage {
            order_id: aggregate.order.id,
            customer_id: aggregate.order.customer_id,
            total: aggregate.total(),
            item_count: aggregate.item_count() as i32,
            customer_email: aggregate.order.customer_email.clone(),
            shipping_address: aggregate
                .order
                .shipping_address
                .clone()
                .unwrap_or_else(|| "no shipping address".to_string()),
            created_at: aggregate.order.created_at,
        };
        let message = Message::json(&envelope)?;

        self.publish_with_reconnect(ORDER_CREATED_QUEUE, message)
            .await?;
        Ok(())
    }

    /// One reconnect-and-redeclare cycle before the failure becomes hard.
    async fn publish_with_reconnect(
        &self,
        queue: &str,
        message: Message,
    ) -> Result<(), ServiceError> {
        let message_id = message.id;
        match self.channel.publish(queue, message.clone()).await {
            Ok(()) => {
                info!(queue, message_id = %message_id, "message published");
                Ok(())
            }
            Err(err) => {
                warn!(queue, error = %err, "publish failed; attempting reconnect");
                self.channel.reconnect().await?;
                self.channel.publish(queue, message).await?;
                info!(queue, message_id = %message_id, "message published after reconnect");
                Ok(())
            }
        }
    }
}
