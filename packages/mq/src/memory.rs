use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::broker::{Broker, Delivery, Receipt};
use crate::error::MqError;

/// Delivery limit Redis applies when none is configured.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u8 = 3;

#[derive(Debug)]
struct Queued {
    message_id: String,
    attempts: u8,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, VecDeque<Queued>>,
    failed: HashMap<String, Vec<serde_json::Value>>,
    sent: HashMap<String, Vec<serde_json::Value>>,
    acked: Vec<String>,
    rejected: Vec<String>,
    unavailable: bool,
    next_id: u64,
}

/// Process-local broker for tests and single-node runs.
///
/// Keeps a history of everything sent per queue and of every settlement, so
/// callers can assert on exactly what crossed the channel. Rejections follow
/// the Redis broker: a message is re-queued until it has been delivered
/// `max_attempts` times, then parked in the queue's failed list.
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<MemoryState>,
    notify: Notify,
    max_attempts: u8,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            notify: Notify::new(),
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Simulate the broker going down (`true`) or coming back (`false`).
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Every payload successfully sent to `queue`, in order.
    pub async fn sent(&self, queue: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .await
            .sent
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages waiting on `queue`.
    pub async fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drain everything waiting on `queue` without settling it.
    pub async fn drain(&self, queue: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .await
            .queues
            .remove(queue)
            .map(|q| q.into_iter().map(|m| m.payload).collect())
            .unwrap_or_default()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    pub async fn rejected(&self) -> Vec<String> {
        self.state.lock().await.rejected.clone()
    }

    /// Messages on `queue` that ran out of delivery attempts.
    pub async fn failed(&self, queue: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .await
            .failed
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<Delivery>, MqError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(MqError::Unavailable("in-memory broker is down".into()));
        }

        Ok(state
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
            .map(|m| Delivery {
                message_id: m.message_id,
                attempts: m.attempts,
                payload: m.payload,
                receipt: Receipt::Memory,
            }))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<(), MqError> {
        {
            let mut state = self.state.lock().await;
            if state.unavailable {
                return Err(MqError::Unavailable("in-memory broker is down".into()));
            }

            state.next_id += 1;
            let message_id = format!("mem-{}", state.next_id);
            debug!(queue, message_id = %message_id, "Queued message");

            state
                .sent
                .entry(queue.to_string())
                .or_default()
                .push(payload.clone());
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Queued {
                    message_id,
                    attempts: 0,
                    payload,
                });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery, MqError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_pop(queue).await? {
                return Ok(delivery);
            }

            notified.await;
        }
    }

    async fn ack(&self, _queue: &str, delivery: Delivery) -> Result<(), MqError> {
        if !matches!(delivery.receipt, Receipt::Memory) {
            return Err(MqError::Internal(
                "delivery was not received from this broker".into(),
            ));
        }
        self.state.lock().await.acked.push(delivery.message_id);
        Ok(())
    }

    async fn reject(&self, queue: &str, delivery: Delivery) -> Result<(), MqError> {
        if !matches!(delivery.receipt, Receipt::Memory) {
            return Err(MqError::Internal(
                "delivery was not received from this broker".into(),
            ));
        }

        let attempts = delivery.attempts.saturating_add(1);
        {
            let mut state = self.state.lock().await;
            state.rejected.push(delivery.message_id.clone());

            if attempts >= self.max_attempts {
                warn!(
                    queue,
                    message_id = %delivery.message_id,
                    attempts,
                    "Message reached max delivery attempts, moved to failed queue"
                );
                state
                    .failed
                    .entry(queue.to_string())
                    .or_default()
                    .push(delivery.payload);
                return Ok(());
            }

            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Queued {
                    message_id: delivery.message_id,
                    attempts,
                    payload: delivery.payload,
                });
        }

        self.notify.notify_waiters();
        Ok(())
    }
}
