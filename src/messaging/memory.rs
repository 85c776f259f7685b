//! In-memory channel with the full broker semantics: durable FIFO queues,
//! explicit acknowledgement, dead-letter routing and per-queue TTL expiry.
//! Connection state is a flag so broker outages can be injected in tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{ChannelError, DeadLetterSpec, Delivery, Message, MessageChannel, Topology};

struct QueueState {
    messages: VecDeque<Message>,
    dead_letter: Option<DeadLetterSpec>,
    message_ttl: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    // (exchange, routing key) -> queue
    bindings: HashMap<(String, String), String>,
    unacked: HashMap<u64, (String, Message)>,
}

pub struct InMemoryChannel {
    topology: Topology,
    inner: Mutex<Inner>,
    connected: AtomicBool,
    reconnect_allowed: AtomicBool,
    notify: Notify,
    next_tag: AtomicU64,
}

impl InMemoryChannel {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(true),
            reconnect_allowed: AtomicBool::new(true),
            notify: Notify::new(),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Fault injection: a disconnected channel rejects every operation
    /// until `reconnect` succeeds.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Fault injection: when disallowed, `reconnect` fails as well.
    pub fn set_reconnect_allowed(&self, allowed: bool) {
        self.reconnect_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Removes and returns every message currently on a queue.
    pub fn drain(&self, queue: &str) -> Vec<Message> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queues
            .get_mut(queue)
            .map(|state| state.messages.drain(..).collect())
            .unwrap_or_default()
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Disconnected)
        }
    }

    fn dead_letter(inner: &mut Inner, origin: &str, message: Message) {
        let route = inner
            .queues
            .get(origin)
            .and_then(|state| state.dead_letter.clone());
        match route {
            Some(spec) => {
                let target = inner
                    .bindings
                    .get(&(spec.exchange.clone(), spec.routing_key.clone()))
                    .cloned();
                match target.and_then(|name| inner.queues.get_mut(&name)) {
                    Some(state) => {
                        debug!(
                            message_id = %message.id,
                            origin,
                            exchange = %spec.exchange,
                            routing_key = %spec.routing_key,
                            "message dead-lettered"
                        );
                        state.messages.push_back(message);
                    }
                    None => warn!(
                        message_id = %message.id,
                        origin,
                        "dead-letter binding missing; message dropped"
                    ),
                }
            }
            None => warn!(
                message_id = %message.id,
                origin,
                "queue has no dead-letter route; message dropped"
            ),
        }
    }

    /// Pops the next live message, rerouting any that outlived the queue TTL.
    fn pop_ready(&self, queue: &str) -> Result<Option<Message>, ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let (message, ttl) = match inner.queues.get_mut(queue) {
                Some(state) => match state.messages.pop_front() {
                    Some(message) => {
                        let ttl = state.message_ttl;
                        (message, ttl)
                    }
                    None => return Ok(None),
                },
                None => return Err(ChannelError::UnknownQueue(queue.to_string())),
            };
            let expired = ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| message.published_at + ttl < Utc::now())
                .unwrap_or(false);
            if expired {
                warn!(message_id = %message.id, queue, "message expired past TTL");
                Self::dead_letter(&mut inner, queue, message);
                continue;
            }
            return Ok(Some(message));
        }
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn declare_topology(&self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock().unwrap();
        for queue in &self.topology.queues {
            // Redeclaring a durable queue keeps its backlog.
            inner
                .queues
                .entry(queue.name.clone())
                .or_insert_with(|| QueueState {
                    messages: VecDeque::new(),
                    dead_letter: queue.dead_letter.clone(),
                    message_ttl: queue.message_ttl,
                });
        }
        for binding in &self.topology.bindings {
            inner.bindings.insert(
                (binding.exchange.clone(), binding.routing_key.clone()),
                binding.queue.clone(),
            );
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        {
            let mut inner = self.inner.lock().unwrap();
            let state = inner
                .queues
                .get_mut(queue)
                .ok_or_else(|| ChannelError::UnknownQueue(queue.to_string()))?;
            state.messages.push_back(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Instant::now() + wait;
        loop {
            self.ensure_connected()?;
            if let Some(message) = self.pop_ready(queue)? {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                self.inner
                    .lock()
                    .unwrap()
                    .unacked
                    .insert(tag, (queue.to_string(), message.clone()));
                return Ok(Some(Delivery {
                    queue: queue.to_string(),
                    tag,
                    message,
                }));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = sleep(remaining.min(Duration::from_millis(25))) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(ChannelError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        let (origin, message) = inner
            .unacked
            .remove(&delivery.tag)
            .ok_or(ChannelError::UnknownDelivery(delivery.tag))?;
        if requeue {
            let state = inner
                .queues
                .get_mut(&origin)
                .ok_or(ChannelError::UnknownQueue(origin.clone()))?;
            state.messages.push_front(message);
        } else {
            Self::dead_letter(&mut inner, &origin, message);
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ChannelError> {
        if !self.reconnect_allowed.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }
        self.connected.store(true, Ordering::SeqCst);
        self.declare_topology().await?;
        self.notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, ChannelError> {
        let inner = self.inner.lock().unwrap();
        inner
            .queues
            .get(queue)
            .map(|state| state.messages.len())
            .ok_or_else(|| ChannelError::UnknownQueue(queue.to_string()))
    }
}
