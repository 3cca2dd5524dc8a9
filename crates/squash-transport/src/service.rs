//! Transport traits and the settle-once delivery wrapper.

use std::fmt::{self, Debug, Formatter};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportResult;
use crate::model::{Attributes, Message, MessageId};

/// Publish/subscribe surface consumed by the relay.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Attach to a subscription for pulling deliveries.
    async fn subscribe(&self, subscription: &str) -> TransportResult<Box<dyn Subscription>>;

    /// Publish a message and return the identifier the transport assigned.
    async fn publish(
        &self,
        topic: &str,
        attributes: &Attributes,
        payload: Bytes,
    ) -> TransportResult<MessageId>;
}

/// Pull side of a subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. Errors are not retried by the caller.
    async fn next(&mut self) -> TransportResult<Delivery>;
}

/// Backend hook that settles one delivery.
#[async_trait]
pub trait AckHandle: Send {
    /// Settle as processed; the transport will not redeliver.
    async fn ack(self: Box<Self>) -> TransportResult<()>;

    /// Settle as unprocessed; the transport will redeliver.
    async fn nack(self: Box<Self>) -> TransportResult<()>;
}

/// A message pulled from a subscription, settled exactly once.
pub struct Delivery {
    message: Message,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    /// Pair a message with the backend hook that settles it.
    #[must_use]
    pub fn new(message: Message, handle: Box<dyn AckHandle>) -> Self {
        Self { message, handle }
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Acknowledge and hand back the message.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot record the acknowledgement.
    pub async fn ack(self) -> TransportResult<Message> {
        self.handle.ack().await?;
        Ok(self.message)
    }

    /// Negatively acknowledge so the transport redelivers the message.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot release the message.
    pub async fn nack(self) -> TransportResult<()> {
        self.handle.nack().await
    }
}

impl Debug for Delivery {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
