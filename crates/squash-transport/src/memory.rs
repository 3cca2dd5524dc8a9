//! In-memory transport that records every settle and publish.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::{TransportError, TransportResult};
use crate::model::{Attributes, Message, MessageId};
use crate::service::{AckHandle, Delivery, MessageTransport, Subscription};

/// A message accepted by [`MemoryTransport::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic it was published to.
    pub topic: String,
    /// Identifier assigned on publish.
    pub id: MessageId,
    /// Attributes as published.
    pub attributes: Attributes,
    /// Payload as published.
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct Ledger {
    queues: HashMap<String, VecDeque<Message>>,
    acked: Vec<MessageId>,
    nacked: Vec<MessageId>,
    published: Vec<PublishedMessage>,
}

#[derive(Debug, Default)]
struct Shared {
    ledger: Mutex<Ledger>,
    arrivals: Notify,
    next_id: AtomicU64,
    fail_publish: AtomicBool,
    fail_receive: AtomicBool,
    publish_delay: Mutex<Option<Duration>>,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("memory transport mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn enqueue(&self, queue: &str, attributes: Attributes, payload: Bytes) -> MessageId {
        let id = format!("m-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let message = Message {
            id: id.clone(),
            attributes,
            payload,
            publish_time: Utc::now(),
        };
        self.ledger()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        self.arrivals.notify_waiters();
        id
    }
}

/// Transport keeping queues in process memory.
///
/// Subscriptions and topics share one namespace: publishing to a topic also
/// enqueues onto the subscription queue with the same name.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a notification for `subscription`.
    pub fn push(
        &self,
        subscription: &str,
        attributes: Attributes,
        payload: impl Into<Bytes>,
    ) -> MessageId {
        self.shared.enqueue(subscription, attributes, payload.into())
    }

    /// Messages waiting on `subscription`.
    #[must_use]
    pub fn pending(&self, subscription: &str) -> usize {
        self.shared
            .ledger()
            .queues
            .get(subscription)
            .map_or(0, VecDeque::len)
    }

    /// Identifiers acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<MessageId> {
        self.shared.ledger().acked.clone()
    }

    /// Identifiers negatively acknowledged so far, in order.
    #[must_use]
    pub fn nacked(&self) -> Vec<MessageId> {
        self.shared.ledger().nacked.clone()
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.ledger().published.clone()
    }

    /// Make every publish fail while `fail` is set.
    pub fn set_fail_publish(&self, fail: bool) {
        self.shared.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every receive fail while `fail` is set.
    pub fn set_fail_receive(&self, fail: bool) {
        self.shared.fail_receive.store(fail, Ordering::SeqCst);
        self.shared.arrivals.notify_waiters();
    }

    /// Delay every publish by `delay`.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        match self.shared.publish_delay.lock() {
            Ok(mut guard) => *guard = delay,
            Err(poisoned) => *poisoned.into_inner() = delay,
        }
    }

    fn publish_delay(&self) -> Option<Duration> {
        match self.shared.publish_delay.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn subscribe(&self, subscription: &str) -> TransportResult<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            name: subscription.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn publish(
        &self,
        topic: &str,
        attributes: &Attributes,
        payload: Bytes,
    ) -> TransportResult<MessageId> {
        if let Some(delay) = self.publish_delay() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "publish_rejected",
            });
        }
        let id = self.shared.enqueue(topic, attributes.clone(), payload.clone());
        self.shared.ledger().published.push(PublishedMessage {
            topic: topic.to_string(),
            id: id.clone(),
            attributes: attributes.clone(),
            payload,
        });
        Ok(id)
    }
}

struct MemorySubscription {
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> TransportResult<Delivery> {
        loop {
            let arrived = self.shared.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if self.shared.fail_receive.load(Ordering::SeqCst) {
                return Err(TransportError::Receive {
                    subscription: self.name.clone(),
                    reason: "receive_rejected",
                });
            }
            let next = self
                .shared
                .ledger()
                .queues
                .get_mut(&self.name)
                .and_then(VecDeque::pop_front);
            if let Some(message) = next {
                let handle = MemoryAckHandle {
                    queue: self.name.clone(),
                    message: message.clone(),
                    shared: Arc::clone(&self.shared),
                };
                return Ok(Delivery::new(message, Box::new(handle)));
            }
            arrived.await;
        }
    }
}

struct MemoryAckHandle {
    queue: String,
    message: Message,
    shared: Arc<Shared>,
}

#[async_trait]
impl AckHandle for MemoryAckHandle {
    async fn ack(self: Box<Self>) -> TransportResult<()> {
        self.shared.ledger().acked.push(self.message.id.clone());
        Ok(())
    }

    async fn nack(self: Box<Self>) -> TransportResult<()> {
        let Self {
            queue,
            message,
            shared,
        } = *self;
        {
            let mut ledger = shared.ledger();
            ledger.nacked.push(message.id.clone());
            ledger.queues.entry(queue).or_default().push_front(message);
        }
        shared.arrivals.notify_waiters();
        Ok(())
    }
}
