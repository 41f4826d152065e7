use async_trait::async_trait;
use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::queue::{BroccoliQueue, RetryStrategy};
use tracing::debug;

use crate::broker::{Broker, Delivery, Receipt};
use crate::config::MqConfig;
use crate::error::MqError;

pub type MqQueue = BroccoliQueue;

/// Connect to Redis. A rejected message is re-queued until it has been
/// delivered `max_delivery_attempts` times, then parked in `<queue>_failed`.
pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .failed_message_retry_strategy(
            RetryStrategy::new().with_attempts(config.max_delivery_attempts.max(1)),
        )
        .build()
        .await
        .map_err(|e| MqError::Unavailable(e.to_string()))
}

// Consumed messages stay in the processing list until acknowledge/reject.
#[async_trait]
impl Broker for MqQueue {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<(), MqError> {
        self.publish(queue, None, &payload, None)
            .await
            .map_err(|e| MqError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery, MqError> {
        let message: BrokerMessage<serde_json::Value> = self.consume(queue, None).await?;
        let message_id = message.task_id.to_string();

        debug!(queue, message_id = %message_id, attempts = message.attempts, "Received message");

        Ok(Delivery {
            message_id,
            attempts: message.attempts,
            payload: message.payload.clone(),
            receipt: Receipt::Redis(Box::new(message)),
        })
    }

    async fn ack(&self, queue: &str, delivery: Delivery) -> Result<(), MqError> {
        match delivery.receipt {
            Receipt::Redis(message) => self.acknowledge(queue, *message).await?,
            Receipt::Memory => {
                return Err(MqError::Internal(
                    "delivery was not received from this broker".into(),
                ));
            }
        }
        Ok(())
    }

    async fn reject(&self, queue: &str, delivery: Delivery) -> Result<(), MqError> {
        match delivery.receipt {
            Receipt::Redis(message) => BroccoliQueue::reject(self, queue, *message).await?,
            Receipt::Memory => {
                return Err(MqError::Internal(
                    "delivery was not received from this broker".into(),
                ));
            }
        }
        Ok(())
    }
}
