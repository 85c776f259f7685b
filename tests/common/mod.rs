//! Shared harness: in-memory wiring of the payment pipeline plus scripted
//! collaborator doubles.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;
use uuid::Uuid;

use ecommerce_payments::entities::order::OrderWithItems;
use ecommerce_payments::entities::payment_request;
use ecommerce_payments::errors::ServiceError;
use ecommerce_payments::gateway::{GatewayOutcome, PaymentGateway};
use ecommerce_payments::messaging::{
    ConsumerConfig, InMemoryChannel, MessageChannel, MessagePublisher, PaymentRequestConsumer,
    RetrySweeper, Topology,
};
use ecommerce_payments::repositories::memory::{
    InMemoryOrderRepository, InMemoryPaymentRequestRepository,
};
use ecommerce_payments::services::notifications::NotificationService;
use ecommerce_payments::services::orders::{CreateOrderRequest, NewOrderItem, OrderService};
use ecommerce_payments::services::payments::PaymentProcessingService;

pub const TEST_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

pub fn approved(reference: &str) -> GatewayOutcome {
    GatewayOutcome::Approved {
        reference: reference.to_string(),
    }
}

pub fn declined(reason: &str) -> GatewayOutcome {
    GatewayOutcome::Declined {
        reason: reason.to_string(),
    }
}

pub fn fault(error: &str) -> GatewayOutcome {
    GatewayOutcome::Fault {
        error: error.to_string(),
    }
}

/// Replays a fixed list of outcomes, then approves everything; records the
/// instant of every call so tests can measure backoff gaps.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<GatewayOutcome>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<GatewayOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn pay(&self, _order: &OrderWithItems) -> GatewayOutcome {
        self.calls.lock().unwrap().push(Instant::now());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| approved(&format!("TEST-{}", Uuid::new_v4().simple())))
    }
}

/// Never answers; the caller's timeout turns it into a gateway fault.
pub struct NeverGateway;

#[async_trait]
impl PaymentGateway for NeverGateway {
    async fn pay(&self, _order: &OrderWithItems) -> GatewayOutcome {
        futures::future::pending().await
    }
}

/// Records confirmation attempts; can be told to fail them all.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Uuid> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send_order_confirmation(&self, order: &OrderWithItems) -> Result<(), ServiceError> {
        self.sent.lock().unwrap().push(order.order.id);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "smtp unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct TestHarness {
    pub channel: Arc<InMemoryChannel>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub payment_requests: Arc<InMemoryPaymentRequestRepository>,
    pub publisher: Arc<MessagePublisher>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let channel = Arc::new(InMemoryChannel::new(Topology::payment(None)));
        channel.declare_topology().await.expect("topology declares");
        let orders = Arc::new(InMemoryOrderRepository::new());
        let payment_requests = Arc::new(InMemoryPaymentRequestRepository::new());
        let publisher = Arc::new(MessagePublisher::new(
            channel.clone(),
            payment_requests.clone(),
            orders.clone(),
        ));
        Self {
            channel,
            orders,
            payment_requests,
            publisher,
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn coordinator(&self, gateway: Arc<dyn PaymentGateway>) -> PaymentProcessingService {
        PaymentProcessingService::new(
            self.orders.clone(),
            self.payment_requests.clone(),
            gateway,
            self.publisher.clone(),
            TEST_GATEWAY_TIMEOUT,
        )
    }

    pub fn consumer(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        backoff_unit: Duration,
    ) -> Arc<PaymentRequestConsumer> {
        Arc::new(PaymentRequestConsumer::new(
            self.channel.clone(),
            self.orders.clone(),
            self.payment_requests.clone(),
            gateway,
            self.notifier.clone(),
            self.publisher.clone(),
            TEST_GATEWAY_TIMEOUT,
            ConsumerConfig {
                connect_attempts: 3,
                connect_retry_delay: Duration::from_millis(50),
                receive_wait: Duration::from_millis(20),
                backoff_unit,
            },
        ))
    }

    pub fn sweeper(&self, cooldown: Duration) -> RetrySweeper {
        RetrySweeper::new(
            self.payment_requests.clone(),
            self.publisher.clone(),
            Duration::from_secs(60),
            cooldown,
        )
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(self.orders.clone(), self.publisher.clone())
    }

    /// Creates an order through the service and clears the order-created
    /// announcement so queue assertions start clean.
    pub async fn seed_order(
        &self,
        shipping_cost: Decimal,
        unit_prices: &[(Decimal, i32)],
    ) -> OrderWithItems {
        let request = CreateOrderRequest {
            customer_id: Uuid::new_v4(),
            customer_email: "buyer@example.com".to_string(),
            currency: "USD".to_string(),
            items: unit_prices
                .iter()
                .map(|(unit_price, quantity)| NewOrderItem {
                    product_id: Uuid::new_v4(),
                    product_name: "widget".to_string(),
                    unit_price: *unit_price,
                    quantity: *quantity,
                })
                .collect(),
            shipping_cost,
            shipping_address: Some("1 Market St".to_string()),
            shipping_service: Some("standard".to_string()),
            shipping_days: Some(5),
        };
        let aggregate = self
            .order_service()
            .create_order(request)
            .await
            .expect("order created");
        self.channel
            .drain(ecommerce_payments::messaging::ORDER_CREATED_QUEUE);
        aggregate
    }
}

/// Polls the store until the request satisfies the predicate; panics after
/// `max_wait` (virtual time under paused tests).
pub async fn wait_for_request<F>(
    repo: &InMemoryPaymentRequestRepository,
    id: Uuid,
    predicate: F,
    max_wait: Duration,
) -> payment_request::Model
where
    F: Fn(&payment_request::Model) -> bool,
{
    use ecommerce_payments::repositories::PaymentRequestRepository;

    let deadline = Instant::now() + max_wait;
    loop {
        if let Some(request) = repo.get_by_id(id).await.expect("store read") {
            if predicate(&request) {
                return request;
            }
        }
        if Instant::now() >= deadline {
            panic!("payment request {id} did not reach the expected state within {max_wait:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls a queue until it holds `expected` messages; panics after `max_wait`.
pub async fn wait_for_queue_len(
    channel: &InMemoryChannel,
    queue: &str,
    expected: usize,
    max_wait: Duration,
) {
    let deadline = Instant::now() + max_wait;
    loop {
        let len = channel.queue_len(queue).await.expect("queue exists");
        if len == expected {
            return;
        }
        if Instant::now() >= deadline {
            panic!("queue {queue} length {len}, expected {expected} within {max_wait:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
