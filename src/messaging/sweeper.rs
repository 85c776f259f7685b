use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

use super::MessagePublisher;
use crate::errors::ServiceError;
use crate::repositories::PaymentRequestRepository;

/// Periodically republishes failed-but-retryable payment requests from the
/// durable store. This is the recovery path for publishes lost after the
/// request row was persisted; duplicates are tolerated downstream because
/// processing is idempotent.
pub struct RetrySweeper {
    payment_requests: Arc<dyn PaymentRequestRepository>,
    publisher: Arc<MessagePublisher>,
    interval: Duration,
    cooldown: Duration,
}

impl RetrySweeper {
    pub fn new(
        payment_requests: Arc<dyn PaymentRequestRepository>,
        publisher: Arc<MessagePublisher>,
        interval: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            payment_requests,
            publisher,
            interval,
            cooldown,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            cooldown_secs = self.cooldown.as_secs(),
            "retry sweeper started"
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep(self.interval) => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "retry sweep failed");
                    }
                }
            }
        }
        info!("retry sweeper stopped");
    }

    /// One pass; returns how many requests were republished.
    pub async fn sweep_once(&self) -> Result<usize, ServiceError> {
        let eligible = self
            .payment_requests
            .list_failed_eligible_for_retry(self.cooldown)
            .await?;

        let mut republished = 0;
        for request in eligible {
            match self.publisher.publish_payment_request(request.id).await {
                Ok(()) => {
                    info!(
                        payment_request_id = %request.id,
                        retry_count = request.retry_count,
                        "failed payment request republished by sweep"
                    );
                    republished += 1;
                }
                Err(err) => {
                    error!(
                        payment_request_id = %request.id,
                        error = %err,
                        "sweep republish failed"
                    );
                }
            }
        }
        Ok(republished)
    }
}
