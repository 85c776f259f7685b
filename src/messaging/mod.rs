/*!
 * Durable message channel for the asynchronous payment pipeline.
 *
 * One dedicated topology: a direct dead-letter exchange, a dead-letter
 * queue bound to it, and the two work queues. Delivery is at-least-once;
 * consumers acknowledge explicitly and reject poison messages without
 * requeue so they land on the dead-letter queue for operator triage.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod consumer;
pub mod memory;
pub mod publisher;
pub mod sweeper;

pub use consumer::{ConsumerConfig, PaymentRequestConsumer};
pub use memory::InMemoryChannel;
pub use publisher::MessagePublisher;
pub use sweeper::RetrySweeper;

pub const PAYMENT_DLX_EXCHANGE: &str = "payment-dlx";
pub const PAYMENT_FAILED_QUEUE: &str = "payment-failed";
pub const PAYMENT_REQUESTS_QUEUE: &str = "payment-requests";
pub const ORDER_CREATED_QUEUE: &str = "order-created";

/// Wire format version; consumers treat anything newer as poison.
pub const MESSAGE_SCHEMA_VERSION: u32 = 1;

/// Channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel disconnected")]
    Disconnected,
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),
}

/// Message envelope as handed to the broker. The body is opaque bytes so a
/// malformed payload is representable (and testable) at this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub schema_version: u32,
    pub persistent: bool,
    pub published_at: DateTime<Utc>,
    pub body: Vec<u8>,
}

impl Message {
    /// Wraps a JSON-serializable payload in a persistent envelope with a
    /// fresh message id and publish timestamp.
    pub fn json<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            schema_version: MESSAGE_SCHEMA_VERSION,
            persistent: true,
            published_at: Utc::now(),
            body: serde_json::to_vec(payload)?,
        })
    }

    /// Raw-byte constructor, mainly useful for fault injection in tests.
    pub fn raw(body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: MESSAGE_SCHEMA_VERSION,
            persistent: true,
            published_at: Utc::now(),
            body,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        if self.schema_version > MESSAGE_SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedVersion(self.schema_version));
        }
        serde_json::from_slice(&self.body).map_err(DecodeError::Json)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported message schema version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// One in-flight delivery; must be settled with `ack` or `nack`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub tag: u64,
    pub message: Message,
}

/// Payload published to `payment-requests`: a snapshot of the durable
/// request at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestMessage {
    pub payment_request_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub customer_email: String,
    pub retry_count: i32,
    pub requested_at: DateTime<Utc>,
}

/// Payload published to `order-created`: an order summary for downstream
/// notification consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedMessage {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub total: Decimal,
    pub item_count: i32,
    pub customer_email: String,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
}

/// Where a queue's rejected or expired messages are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterSpec {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub dead_letter: Option<DeadLetterSpec>,
    pub message_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BindingSpec {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

/// Declared once at startup and re-declared after every reconnect.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    /// The payment pipeline topology. When `message_ttl` is set,
    /// `payment-requests` messages lingering past it are rerouted to
    /// `payment-failed` through the dead-letter exchange.
    pub fn payment(message_ttl: Option<Duration>) -> Self {
        let dead_letter = DeadLetterSpec {
            exchange: PAYMENT_DLX_EXCHANGE.to_string(),
            routing_key: PAYMENT_FAILED_QUEUE.to_string(),
        };
        Self {
            exchanges: vec![ExchangeSpec {
                name: PAYMENT_DLX_EXCHANGE.to_string(),
                durable: true,
            }],
            queues: vec![
                QueueSpec {
                    name: PAYMENT_FAILED_QUEUE.to_string(),
                    durable: true,
                    dead_letter: None,
                    message_ttl: None,
                },
                QueueSpec {
                    name: PAYMENT_REQUESTS_QUEUE.to_string(),
                    durable: true,
                    dead_letter: Some(dead_letter.clone()),
                    message_ttl,
                },
                QueueSpec {
                    name: ORDER_CREATED_QUEUE.to_string(),
                    durable: true,
                    dead_letter: None,
                    message_ttl: None,
                },
            ],
            bindings: vec![BindingSpec {
                exchange: PAYMENT_DLX_EXCHANGE.to_string(),
                routing_key: PAYMENT_FAILED_QUEUE.to_string(),
                queue: PAYMENT_FAILED_QUEUE.to_string(),
            }],
        }
    }
}

/// Broker-agnostic channel. The in-memory implementation carries the full
/// semantics; a real broker client slots in behind the same trait.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Declares exchanges, queues and bindings. Requires a live connection
    /// and is idempotent, so it doubles as the startup connectivity check.
    async fn declare_topology(&self) -> Result<(), ChannelError>;

    async fn publish(&self, queue: &str, message: Message) -> Result<(), ChannelError>;

    /// Blocks up to `wait` for the next delivery. Returning `Ok(None)` on
    /// timeout keeps the consumer loop responsive to shutdown.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Rejects a delivery. With `requeue` the message returns to the front
    /// of its queue; without it the message is dead-lettered (or dropped if
    /// the queue has no dead-letter route).
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError>;

    /// One reconnect-and-redeclare cycle.
    async fn reconnect(&self) -> Result<(), ChannelError>;

    fn is_connected(&self) -> bool;

    async fn queue_len(&self, queue: &str) -> Result<usize, ChannelError>;
}
