use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobId, JobPriority, JobRecord};
use crate::message::QueueMessage;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::{DEFAULT_CHANNEL, RedisSink};

/// Status reported to observers. `retrying` exists only here; the record
/// itself goes back to `queued`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Queued => "queued",
            EventStatus::Processing => "processing",
            EventStatus::Retrying => "retrying",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional details attached to a [`StatusEvent`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

/// A job status change as seen by observers. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: EventStatus,
    pub url: String,
    pub priority: JobPriority,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl StatusEvent {
    pub fn new(
        job_id: JobId,
        status: EventStatus,
        url: impl Into<String>,
        priority: JobPriority,
    ) -> Self {
        Self {
            job_id,
            status,
            url: url.into(),
            priority,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn for_record(record: &JobRecord, status: EventStatus) -> Self {
        Self::new(record.id, status, record.url.clone(), record.priority)
    }

    pub fn for_message(message: &QueueMessage, status: EventStatus) -> Self {
        Self::new(message.job_id, status, message.url.clone(), message.priority)
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Fire-and-forget status publication used by the worker and submitter.
///
/// Implementations swallow and log their own failures; publishing never
/// fails the caller and never waits on a slow observer.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn publish(&self, event: StatusEvent);
}

/// One destination behind a [`FanOut`].
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Short name used in logs when delivery fails.
    fn name(&self) -> &str;

    async fn deliver(&self, event: &StatusEvent) -> anyhow::Result<()>;
}

/// Upper bound on a single sink delivery unless overridden.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Publishes every event to all registered sinks concurrently.
///
/// Each delivery runs under `delivery_timeout`; a sink that does not answer
/// in time is logged and skipped, so `publish` returns within one timeout.
#[derive(Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn StatusSink>>,
    delivery_timeout: Duration,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            sinks: Vec::new(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("FanOut")
            .field("sinks", &names)
            .field("delivery_timeout", &self.delivery_timeout)
            .finish()
    }
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Give up on a sink that has not finished delivering after `timeout`.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    pub fn add(&mut self, sink: Arc<dyn StatusSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl StatusChannel for FanOut {
    async fn publish(&self, event: StatusEvent) {
        let event = &event;
        let deliveries = self.sinks.iter().map(|sink| async move {
            match tokio::time::timeout(self.delivery_timeout, sink.deliver(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    sink = sink.name(),
                    job_id = %event.job_id,
                    status = %event.status,
                    "status sink delivery failed: {err:#}"
                ),
                Err(_) => tracing::warn!(
                    sink = sink.name(),
                    job_id = %event.job_id,
                    status = %event.status,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "status sink delivery timed out"
                ),
            }
        });
        futures::future::join_all(deliveries).await;
    }
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Publishing never waits: subscribers that fall more than `capacity`
/// events behind receive `RecvError::Lagged` and skip ahead. With no
/// subscribers the event is dropped.
pub struct BroadcastSink {
    sender: broadcast::Sender<StatusEvent>,
    capacity: usize,
}

impl std::fmt::Debug for BroadcastSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastSink")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl StatusSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, event: &StatusEvent) -> anyhow::Result<()> {
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Writes each event as a structured `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &StatusEvent) -> anyhow::Result<()> {
        let data = event.data.as_ref();
        tracing::info!(
            job_id = %event.job_id,
            status = %event.status,
            url = %event.url,
            priority = %event.priority,
            retry_count = data.and_then(|d| d.retry_count),
            error = data.and_then(|d| d.error.as_deref()),
            "job status changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn event(status: EventStatus) -> StatusEvent {
        StatusEvent::new(
            JobId::new(),
            status,
            "https://example.com",
            JobPriority::Medium,
        )
    }

    struct Broken {
        attempts: AtomicUsize,
    }

    struct Stalled;

    #[async_trait]
    impl StatusSink for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn deliver(&self, _event: &StatusEvent) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl StatusSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _event: &StatusEvent) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_multiple_subscribers() {
        let sink = Arc::new(BroadcastSink::new(100));
        let fan_out = FanOut::new().with_sink(sink.clone());

        let mut rx1 = sink.subscribe();
        let mut rx2 = sink.subscribe();

        for status in [EventStatus::Queued, EventStatus::Processing] {
            fan_out.publish(event(status)).await;
        }

        for expected in [EventStatus::Queued, EventStatus::Processing] {
            let evt1 = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let evt2 = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(evt1.status, expected);
            assert_eq!(evt2.status, expected);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let sink = Arc::new(BroadcastSink::new(2));
        let fan_out = FanOut::new().with_sink(sink.clone());
        let mut rx = sink.subscribe();

        for _ in 0..5 {
            fan_out.publish(event(EventStatus::Processing)).await;
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        match result.unwrap() {
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                assert_eq!(skipped, 3);
            }
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_starve_others() {
        let broken = Arc::new(Broken {
            attempts: AtomicUsize::new(0),
        });
        let sink = Arc::new(BroadcastSink::new(8));
        let fan_out = FanOut::new()
            .with_sink(broken.clone())
            .with_sink(Arc::new(LogSink))
            .with_sink(sink.clone());
        let mut rx = sink.subscribe();

        fan_out.publish(event(EventStatus::Completed)).await;

        assert_eq!(broken.attempts.load(Ordering::SeqCst), 1);
        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn test_stalled_sink_is_cut_off_by_delivery_timeout() {
        let sink = Arc::new(BroadcastSink::new(8));
        let fan_out = FanOut::new()
            .with_sink(Arc::new(Stalled))
            .with_sink(sink.clone())
            .with_delivery_timeout(Duration::from_millis(50));
        let mut rx = sink.subscribe();

        timeout(Duration::from_secs(1), fan_out.publish(event(EventStatus::Processing)))
            .await
            .expect("publish bounded by delivery timeout");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, EventStatus::Processing);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let fan_out = FanOut::new().with_sink(Arc::new(BroadcastSink::new(4)));
        fan_out.publish(event(EventStatus::Failed)).await;
        FanOut::new().publish(event(EventStatus::Failed)).await;
    }

    #[test]
    fn test_debug_format() {
        let sink = BroadcastSink::new(100);
        let _rx1 = sink.subscribe();
        let _rx2 = sink.subscribe();

        let debug_str = format!("{:?}", sink);
        assert!(debug_str.contains("BroadcastSink"));
        assert!(debug_str.contains("subscribers: 2"));
        assert!(debug_str.contains("capacity: 100"));

        let fan_out = FanOut::new()
            .with_sink(Arc::new(sink))
            .with_sink(Arc::new(LogSink));
        assert_eq!(
            format!("{:?}", fan_out),
            r#"FanOut { sinks: ["broadcast", "log"], delivery_timeout: 2s }"#
        );
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = event(EventStatus::Retrying).with_data(EventData {
            error: Some("timeout".into()),
            retry_count: Some(1),
            retry_in_ms: Some(5_000),
            ..EventData::default()
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "retrying");
        assert_eq!(value["data"]["retryCount"], 1);
        assert_eq!(value["data"]["retryInMs"], 5_000);
        assert!(value["data"].get("title").is_none());
        assert!(value.get("jobId").is_some());
    }
}
