use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{Delivery, MessageChannel, MessagePublisher, PaymentRequestMessage, PAYMENT_REQUESTS_QUEUE};
use crate::entities::order::OrderWithItems;
use crate::errors::ServiceError;
use crate::gateway::{GatewayOutcome, PaymentGateway};
use crate::repositories::{OrderRepository, PaymentRequestRepository};
use crate::services::notifications::NotificationService;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Broker connection attempts at startup before degrading.
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_retry_delay: Duration,
    /// How long one receive call blocks; bounds shutdown latency.
    pub receive_wait: Duration,
    /// Base unit of the exponential backoff (2^retry_count units).
    pub backoff_unit: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 10,
            connect_retry_delay: Duration::from_secs(5),
            receive_wait: Duration::from_secs(5),
            backoff_unit: Duration::from_secs(60),
        }
    }
}

/// Background worker that drives queued payment requests to a terminal
/// state. Processes one delivery at a time; redelivery after a crash is
/// safe because every transition is an overwrite.
pub struct PaymentRequestConsumer {
    channel: Arc<dyn MessageChannel>,
    orders: Arc<dyn OrderRepository>,
    payment_requests: Arc<dyn PaymentRequestRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<dyn NotificationService>,
    publisher: Arc<MessagePublisher>,
    gateway_timeout: Duration,
    config: ConsumerConfig,
}

impl PaymentRequestConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        orders: Arc<dyn OrderRepository>,
        payment_requests: Arc<dyn PaymentRequestRepository>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<dyn NotificationService>,
        publisher: Arc<MessagePublisher>,
        gateway_timeout: Duration,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            channel,
            orders,
            payment_requests,
            gateway,
            notifications,
            publisher,
            gateway_timeout,
            config,
        }
    }

    /// Runs until the shutdown signal flips. If the broker never comes up
    /// the worker logs a terminal error and returns; synchronous payments
    /// keep working through the coordinator's direct path.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.connect_with_retry(&shutdown).await {
            return;
        }
        info!("payment request consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.channel.receive(PAYMENT_REQUESTS_QUEUE, self.config.receive_wait) => {
                    match received {
                        Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, "receive failed; attempting reconnect");
                            if let Err(reconnect_err) = self.channel.reconnect().await {
                                warn!(error = %reconnect_err, "reconnect failed");
                                sleep(self.config.connect_retry_delay).await;
                            }
                        }
                    }
                }
            }
        }

        info!("payment request consumer stopped");
    }

    async fn connect_with_retry(&self, shutdown: &watch::Receiver<bool>) -> bool {
        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            if *shutdown.borrow() {
                return false;
            }
            info!(attempt, max_attempts = attempts, "connecting to message broker");
            match self.channel.declare_topology().await {
                Ok(()) => {
                    info!("message broker connection established");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, max_attempts = attempts, error = %err, "broker connection failed");
                }
            }
            if attempt < attempts {
                sleep(self.config.connect_retry_delay).await;
            }
        }
        error!(
            attempts,
            "giving up on message broker; async payment processing disabled"
        );
        false
    }

    /// Settles exactly one delivery: ack on a terminal outcome, nack
    /// without requeue on poison or an unhandled processing error.
    async fn handle_delivery(&self, delivery: Delivery) {
        let envelope: PaymentRequestMessage = match delivery.message.decode() {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    message_id = %delivery.message.id,
                    error = %err,
                    "undecodable payment request message; dead-lettering"
                );
                self.settle_nack(&delivery).await;
                return;
            }
        };

        match self.process(&envelope).await {
            Ok(()) => {
                if let Err(err) = self.channel.ack(&delivery).await {
                    error!(message_id = %delivery.message.id, error = %err, "failed to ack delivery");
                }
            }
            Err(err) => {
                error!(
                    payment_request_id = %envelope.payment_request_id,
                    error = %err,
                    "payment request processing failed; dead-lettering"
                );
                self.settle_nack(&delivery).await;
            }
        }
    }

    async fn settle_nack(&self, delivery: &Delivery) {
        if let Err(err) = self.channel.nack(delivery, false).await {
            error!(message_id = %delivery.message.id, error = %err, "failed to nack delivery");
        }
    }

    async fn process(&self, message: &PaymentRequestMessage) -> Result<(), ServiceError> {
        info!(
            payment_request_id = %message.payment_request_id,
            order_id = %message.order_id,
            retry_count = message.retry_count,
            "processing payment request"
        );

        let Some(mut request) = self
            .payment_requests
            .get_by_id(message.payment_request_id)
            .await?
        else {
            warn!(payment_request_id = %message.payment_request_id, "payment request not found; dropping");
            return Ok(());
        };

        let Some(mut aggregate) = self.orders.get_by_id(message.order_id).await? else {
            warn!(order_id = %message.order_id, "order not found; cancelling payment request");
            request.mark_as_cancelled();
            self.payment_requests.update(&request).await?;
            return Ok(());
        };

        request.mark_as_processing();
        aggregate.order.mark_payment_processing();
        self.payment_requests.update(&request).await?;
        self.orders.update(&aggregate.order).await?;

        match self.pay_with_timeout(&aggregate).await {
            GatewayOutcome::Approved { reference } => {
                request.mark_as_completed(Some(reference.clone()));
                aggregate.order.confirm();
                self.payment_requests.update(&request).await?;
                self.orders.update(&aggregate.order).await?;
                info!(
                    payment_request_id = %request.id,
                    order_id = %aggregate.order.id,
                    gateway_reference = %reference,
                    "payment settled"
                );

                if let Err(err) = self.notifications.send_order_confirmation(&aggregate).await {
                    error!(
                        order_id = %aggregate.order.id,
                        error = %err,
                        "failed to send order confirmation"
                    );
                }
            }
            outcome => {
                let reason = match outcome {
                    GatewayOutcome::Declined { reason } => reason,
                    GatewayOutcome::Fault { error } => format!("gateway error: {error}"),
                    GatewayOutcome::Approved { .. } => unreachable!("handled above"),
                };
                request.mark_as_failed(&reason);
                aggregate.order.mark_payment_failed();
                self.payment_requests.update(&request).await?;
                self.orders.update(&aggregate.order).await?;
                warn!(
                    payment_request_id = %request.id,
                    order_id = %aggregate.order.id,
                    retry_count = request.retry_count,
                    reason = %reason,
                    "payment attempt failed"
                );

                if request.can_retry() {
                    self.schedule_republish(request.id, request.retry_count);
                } else {
                    warn!(
                        payment_request_id = %request.id,
                        "retries exhausted; left failed for manual remediation"
                    );
                }
            }
        }

        Ok(())
    }

    async fn pay_with_timeout(&self, order: &OrderWithItems) -> GatewayOutcome {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.pay(order)).await {
            Ok(outcome) => outcome,
            Err(_) => GatewayOutcome::Fault {
                error: "gateway timed out".to_string(),
            },
        }
    }

    /// Delayed republish on a timer task. The handler is never blocked, so
    /// the consumer slot frees up for the next delivery immediately.
    fn schedule_republish(&self, payment_request_id: uuid::Uuid, retry_count: i32) {
        let exponent = retry_count.clamp(0, 16) as u32;
        let delay = self.config.backoff_unit * 2u32.pow(exponent);
        info!(
            payment_request_id = %payment_request_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling payment retry"
        );
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = publisher.publish_payment_request(payment_request_id).await {
                error!(
                    payment_request_id = %payment_request_id,
                    error = %err,
                    "failed to republish payment request"
                );
            }
        });
    }
}
