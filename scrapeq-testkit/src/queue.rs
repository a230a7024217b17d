use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use scrapeq::{
    DeliveryReceipt, Envelope, MessageId, QueueMessage, QueuePort, QueueSnapshot,
};
use tokio::time::Instant;
use uuid::Uuid;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// In-memory queue with visibility timeouts, delayed sends, receipts and a
/// dead-letter list. Clones share the same state.
#[derive(Clone, Debug)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    visibility_timeout: Duration,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    sent: Vec<SentMessage>,
    deleted: Vec<MessageId>,
    dead_letters: Vec<DeadLetter>,
    batch_sizes: Vec<usize>,
    fail_sends: usize,
    fail_receives: usize,
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    body: Option<String>,
    visible_at: Instant,
    delivery_count: u32,
    receipt: Option<String>,
}

/// A message accepted by [`QueuePort::send`].
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub id: MessageId,
    pub message: QueueMessage,
    pub delay: Duration,
}

#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub message: QueueMessage,
    pub reason: String,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// A received message becomes visible again after `timeout` unless deleted.
    pub fn with_visibility_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            visibility_timeout: timeout,
        }
    }

    /// Enqueue a raw body, bypassing serialization. `None` models a
    /// delivery without a body.
    pub fn push_raw(&self, body: Option<&str>) -> MessageId {
        let id = MessageId(Uuid::now_v7().to_string());
        self.state.lock().messages.push(StoredMessage {
            id: id.clone(),
            body: body.map(str::to_string),
            visible_at: Instant::now(),
            delivery_count: 0,
            receipt: None,
        });
        id
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().fail_sends = count;
    }

    /// Make the next `count` receives fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.state.lock().fail_receives = count;
    }

    /// Make every received but undeleted message visible right away.
    pub fn expire_visibility(&self) {
        let now = Instant::now();
        for stored in &mut self.state.lock().messages {
            if stored.receipt.is_some() {
                stored.visible_at = now;
            }
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    /// Ids of deleted messages in deletion order.
    pub fn deleted(&self) -> Vec<MessageId> {
        self.state.lock().deleted.clone()
    }

    /// Sizes of the non-empty batches handed out by `receive`, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().batch_sizes.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.clone()
    }

    /// Messages still held, in flight or not.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_visible(&self, max_messages: usize) -> Vec<Envelope> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut batch = Vec::new();

        for stored in state.messages.iter_mut() {
            if batch.len() >= max_messages {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.delivery_count += 1;
            stored.visible_at = now + self.visibility_timeout;
            let receipt = format!("{}-{}", stored.id, stored.delivery_count);
            stored.receipt = Some(receipt.clone());

            batch.push(Envelope {
                body: stored.body.clone(),
                receipt: DeliveryReceipt::new(receipt),
                delivery_count: stored.delivery_count,
            });
        }
        if !batch.is_empty() {
            state.batch_sizes.push(batch.len());
        }
        batch
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueuePort for InMemoryQueue {
    async fn send(
        &self,
        message: &QueueMessage,
        delay: Duration,
    ) -> anyhow::Result<MessageId> {
        let body = message.to_body()?;
        let mut state = self.state.lock();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            anyhow::bail!("injected send failure");
        }

        let id = MessageId(Uuid::now_v7().to_string());
        state.messages.push(StoredMessage {
            id: id.clone(),
            body: Some(body),
            visible_at: Instant::now() + delay,
            delivery_count: 0,
            receipt: None,
        });
        state.sent.push(SentMessage {
            id: id.clone(),
            message: message.clone(),
            delay,
        });
        Ok(id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> anyhow::Result<Vec<Envelope>> {
        {
            let mut state = self.state.lock();
            if state.fail_receives > 0 {
                state.fail_receives -= 1;
                anyhow::bail!("injected receive failure");
            }
        }

        let deadline = Instant::now() + wait;
        loop {
            let batch = self.take_visible(max_messages);
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &DeliveryReceipt) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let position = state
            .messages
            .iter()
            .position(|stored| stored.receipt.as_deref() == Some(receipt.as_str()));

        let Some(position) = position else {
            anyhow::bail!("unknown or stale receipt: {receipt}");
        };
        let stored = state.messages.remove(position);
        state.deleted.push(stored.id);
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &QueueMessage,
        reason: &str,
    ) -> anyhow::Result<()> {
        tracing::debug!(job_id = %message.job_id, reason, "message dead-lettered");
        self.state.lock().dead_letters.push(DeadLetter {
            message: message.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<QueueSnapshot> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut snapshot = QueueSnapshot::empty(Utc::now());

        for stored in &state.messages {
            if stored.visible_at <= now {
                snapshot.available += 1;
            } else if stored.receipt.is_some() {
                snapshot.in_flight += 1;
            } else {
                snapshot.delayed += 1;
            }
        }
        snapshot.dead_lettered = state.dead_letters.len();
        Ok(snapshot)
    }
}
