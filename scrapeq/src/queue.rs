use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{DeliveryReceipt, Envelope, MessageId, QueueMessage};

/// Trait for durable at-least-once queues feeding the scrape worker.
///
/// A received message stays invisible to other consumers until its
/// visibility window lapses; anything not deleted by then is handed out
/// again with a higher delivery count.
#[async_trait]
pub trait QueuePort: Send + Sync {
    /// Enqueue a message that becomes visible after `delay`.
    async fn send(
        &self,
        message: &QueueMessage,
        delay: Duration,
    ) -> anyhow::Result<MessageId>;

    /// Long-poll for up to `max_messages`, waiting at most `wait`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> anyhow::Result<Vec<Envelope>>;

    /// Acknowledge one delivery so the message is never handed out again.
    async fn delete(&self, receipt: &DeliveryReceipt) -> anyhow::Result<()>;

    /// Park an exhausted message on the dead-letter queue.
    async fn dead_letter(
        &self,
        message: &QueueMessage,
        reason: &str,
    ) -> anyhow::Result<()>;

    /// Approximate depth counters.
    async fn snapshot(&self) -> anyhow::Result<QueueSnapshot>;
}

/// Queue depth at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Messages ready to be received.
    pub available: usize,
    /// Messages received and not yet deleted.
    pub in_flight: usize,
    /// Messages sent with a delay that has not elapsed.
    pub delayed: usize,
    /// Messages parked on the dead-letter queue.
    pub dead_lettered: usize,
}

impl QueueSnapshot {
    pub fn empty(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            available: 0,
            in_flight: 0,
            delayed: 0,
            dead_lettered: 0,
        }
    }

    /// Messages that will still be delivered to a worker.
    pub fn outstanding(&self) -> usize {
        self.available + self.in_flight + self.delayed
    }
}
