use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::OrderWithItems;
use crate::entities::payment_request;
use crate::errors::ServiceError;
use crate::gateway::{GatewayOutcome, PaymentGateway};
use crate::messaging::MessagePublisher;
use crate::repositories::{OrderRepository, PaymentRequestRepository};

/// Result of a payment attempt as seen by the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Settled synchronously; the order is confirmed.
    Success {
        message: String,
        gateway_reference: Option<String>,
    },
    /// Queued for asynchronous settlement.
    Pending {
        message: String,
        payment_request_id: Uuid,
    },
    /// Nothing was attempted (e.g. unknown order).
    Failure { message: String },
}

/// Decides between immediate and deferred settlement: try the gateway once,
/// and on any decline or fault fall back to the durable queue pipeline.
pub struct PaymentProcessingService {
    orders: Arc<dyn OrderRepository>,
    payment_requests: Arc<dyn PaymentRequestRepository>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<MessagePublisher>,
    gateway_timeout: Duration,
}

impl PaymentProcessingService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payment_requests: Arc<dyn PaymentRequestRepository>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<MessagePublisher>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            payment_requests,
            gateway,
            publisher,
            gateway_timeout,
        }
    }

    /// Processes payment for an order. On return the order is either
    /// `Confirmed` or `PaymentPending`, never left at `Pending`. Gateway
    /// failures of any kind are soft; only store failures surface as `Err`.
    #[instrument(skip(self), fields(order_id = %order_id, payment_method = %payment_method))]
    pub async fn process_payment(
        &self,
        order_id: Uuid,
        payment_method: &str,
        customer_email: &str,
    ) -> Result<PaymentOutcome, ServiceError> {
        let Some(mut aggregate) = self.orders.get_by_id(order_id).await? else {
            return Ok(PaymentOutcome::Failure {
                message: "order not found".to_string(),
            });
        };

        // One active request per order: re-joining an in-flight attempt
        // instead of stacking a second one.
        if let Some(existing) = self.payment_requests.find_active_for_order(order_id).await? {
            info!(
                payment_request_id = %existing.id,
                "payment already queued for order; returning existing request"
            );
            return Ok(PaymentOutcome::Pending {
                message: "payment request is already being processed".to_string(),
                payment_request_id: existing.id,
            });
        }

        let total = aggregate.total();
        if total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "order {} has a non-positive total",
                order_id
            )));
        }

        match self.pay_with_timeout(&aggregate).await {
            GatewayOutcome::Approved { reference } => {
                aggregate.order.confirm();
                self.orders.update(&aggregate.order).await?;
                info!(gateway_reference = %reference, "direct payment successful");
                Ok(PaymentOutcome::Success {
                    message: "payment processed successfully".to_string(),
                    gateway_reference: Some(reference),
                })
            }
            outcome => {
                let reason = match outcome {
                    GatewayOutcome::Declined { reason } => reason,
                    GatewayOutcome::Fault { error } => format!("gateway error: {error}"),
                    GatewayOutcome::Approved { .. } => unreachable!("handled above"),
                };
                warn!(reason = %reason, "direct payment failed; queueing async payment request");

                let request = payment_request::Model::new(
                    order_id,
                    total,
                    &aggregate.order.currency,
                    payment_method,
                    customer_email,
                );
                let request = self.payment_requests.create(request).await?;

                aggregate.order.mark_payment_pending();
                self.orders.update(&aggregate.order).await?;

                // The durable row is the source of truth from here on; a
                // lost publish is recovered by the retry sweep.
                if let Err(err) = self.publisher.publish_payment_request(request.id).await {
                    warn!(
                        payment_request_id = %request.id,
                        error = %err,
                        "failed to publish payment request; relying on durable record"
                    );
                }

                info!(payment_request_id = %request.id, "payment request queued");
                Ok(PaymentOutcome::Pending {
                    message: "payment request has been queued for processing".to_string(),
                    payment_request_id: request.id,
                })
            }
        }
    }

    /// Current status of a payment request, for operational visibility.
    pub async fn payment_status(
        &self,
        payment_request_id: Uuid,
    ) -> Result<Option<payment_request::Model>, ServiceError> {
        self.payment_requests.get_by_id(payment_request_id).await
    }

    /// Pending requests oldest first, for operational visibility.
    pub async fn list_pending_requests(
        &self,
    ) -> Result<Vec<payment_request::Model>, ServiceError> {
        self.payment_requests.list_pending().await
    }

    async fn pay_with_timeout(&self, order: &OrderWithItems) -> GatewayOutcome {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.pay(order)).await {
            Ok(outcome) => outcome,
            Err(_) => GatewayOutcome::Fault {
                error: "gateway timed out".to_string(),
            },
        }
    }
}
