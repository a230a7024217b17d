use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use scrapeq::{EventStatus, JobId, StatusChannel, StatusEvent, StatusSink};

/// Keeps every published event. Usable directly as a [`StatusChannel`] or
/// as one sink behind a `FanOut`.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
    failing: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, deliveries are recorded and then reported as failed.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// While set, deliveries are recorded and then never return.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, job_id: JobId) -> Vec<StatusEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Status sequence published for one job.
    pub fn statuses_for(&self, job_id: JobId) -> Vec<EventStatus> {
        self.events_for(job_id)
            .into_iter()
            .map(|event| event.status)
            .collect()
    }

    pub fn count(&self, status: EventStatus) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.status == status)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &StatusEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("injected sink failure");
        }
        Ok(())
    }
}

#[async_trait]
impl StatusChannel for RecordingSink {
    async fn publish(&self, event: StatusEvent) {
        self.events.lock().push(event);
    }
}
