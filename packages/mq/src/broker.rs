use std::fmt;

use async_trait::async_trait;
use broccoli_queue::brokers::broker::BrokerMessage;
use common::mq::Message;
use tracing::debug;

use crate::error::MqError;

/// A message taken off a queue and not yet settled.
///
/// Hand it back to the broker it came from with [`Broker::ack`] once the
/// message has been fully applied, or [`Broker::reject`] to have it redelivered.
pub struct Delivery {
    pub message_id: String,
    /// Times this message was rejected before this delivery.
    pub attempts: u8,
    pub payload: serde_json::Value,
    pub(crate) receipt: Receipt,
}

pub(crate) enum Receipt {
    Redis(Box<BrokerMessage<serde_json::Value>>),
    Memory,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("attempts", &self.attempts)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Broker channel handle injected into the components that publish or consume.
///
/// Delivery is at-least-once: nothing is acknowledged implicitly.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a raw JSON payload to `queue`.
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<(), MqError>;

    /// Wait for the next message on `queue`.
    async fn receive(&self, queue: &str) -> Result<Delivery, MqError>;

    /// Settle a delivery as processed.
    async fn ack(&self, queue: &str, delivery: Delivery) -> Result<(), MqError>;

    /// Settle a delivery as not processed. The broker redelivers it until the
    /// message has used up its delivery attempts, then parks it.
    async fn reject(&self, queue: &str, delivery: Delivery) -> Result<(), MqError>;
}

#[async_trait]
pub trait BrokerExt: Broker {
    /// Serialize a typed message and publish it.
    async fn publish<M: Message>(&self, queue: &str, message: &M) -> Result<(), MqError> {
        let payload = serde_json::to_value(message)?;

        debug!(
            queue,
            message_type = M::message_type(),
            message_id = %message.message_id(),
            "Publishing message"
        );

        self.send(queue, payload).await
    }
}

impl<B: Broker + ?Sized> BrokerExt for B {}
