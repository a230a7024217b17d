use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use scrapeq::{
    CreateMode, JobId, JobRecord, JobStatus, JobStore, JobUpdate, ScrapedContent,
    StoreError,
};

/// In-memory [`JobStore`] that enforces [`JobRecord::apply`] exactly like a
/// durable adapter would. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<JobId, JobRecord>,
    content: HashMap<JobId, ScrapedContent>,
    history: HashMap<JobId, Vec<JobStatus>>,
    failing_updates: HashMap<JobStatus, usize>,
    fail_gets: usize,
    fail_saves: usize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as-is, replacing any existing one.
    pub fn insert(&self, record: JobRecord) {
        let mut state = self.state.lock();
        state
            .history
            .entry(record.id)
            .or_default()
            .push(record.status);
        state.records.insert(record.id, record);
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    pub fn content(&self, id: JobId) -> Option<ScrapedContent> {
        self.state.lock().content.get(&id).cloned()
    }

    /// Every status the record has held, starting with its created status.
    pub fn status_history(&self, id: JobId) -> Vec<JobStatus> {
        self.state
            .lock()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `count` updates that request `status`.
    pub fn fail_updates_to(&self, status: JobStatus, count: usize) {
        self.state.lock().failing_updates.insert(status, count);
    }

    pub fn fail_next_gets(&self, count: usize) {
        self.state.lock().fail_gets = count;
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.state.lock().fail_saves = count;
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        record: &JobRecord,
        mode: CreateMode,
    ) -> anyhow::Result<()> {
        if mode == CreateMode::FailIfExists
            && self.state.lock().records.contains_key(&record.id)
        {
            return Err(StoreError::AlreadyExists(record.id).into());
        }
        self.insert(record.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let mut state = self.state.lock();
        if state.fail_gets > 0 {
            state.fail_gets -= 1;
            anyhow::bail!("injected get failure");
        }
        Ok(state.records.get(&id).cloned())
    }

    async fn update(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> anyhow::Result<JobRecord> {
        let mut state = self.state.lock();

        if let Some(status) = update.status
            && let Some(remaining) = state.failing_updates.get_mut(&status)
            && *remaining > 0
        {
            *remaining -= 1;
            anyhow::bail!("injected update failure for status {status}");
        }

        let Some(current) = state.records.get(&id) else {
            return Err(StoreError::NotFound(id).into());
        };
        let mut next = current.clone();
        next.apply(&update)
            .map_err(|error| StoreError::Transition { id, error })?;

        state.history.entry(id).or_default().push(next.status);
        state.records.insert(id, next.clone());
        Ok(next)
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<JobRecord>> {
        let mut records: Vec<JobRecord> =
            self.state.lock().records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn save_content(&self, content: &ScrapedContent) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves > 0 {
            state.fail_saves -= 1;
            anyhow::bail!("injected save failure");
        }
        state.content.insert(content.job_id, content.clone());
        Ok(())
    }

    async fn get_content(
        &self,
        id: JobId,
    ) -> anyhow::Result<Option<ScrapedContent>> {
        Ok(self.state.lock().content.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scrapeq::{JobPriority, TransitionError};

    #[tokio::test]
    async fn test_update_enforces_state_machine() {
        let store = InMemoryJobStore::new();
        let record = JobRecord::new("https://example.com", JobPriority::Low, 3);
        store.create(&record, CreateMode::FailIfExists).await.unwrap();

        store.update(record.id, JobUpdate::completed(Utc::now())).await.unwrap();
        let err = store
            .update(record.id, JobUpdate::processing())
            .await
            .unwrap_err();

        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Transition { error, .. }) => {
                assert_eq!(*error, TransitionError::Terminal(JobStatus::Completed));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            store.status_history(record.id),
            vec![JobStatus::Queued, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_unless_overwriting() {
        let store = InMemoryJobStore::new();
        let record = JobRecord::new("https://example.com", JobPriority::Low, 3);
        store.create(&record, CreateMode::FailIfExists).await.unwrap();

        let err = store
            .create(&record, CreateMode::FailIfExists)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::AlreadyExists(_))
        ));
        store.create(&record, CreateMode::Overwrite).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_update_failure_is_scoped_to_status() {
        let store = InMemoryJobStore::new();
        let record = JobRecord::new("https://example.com", JobPriority::Low, 3);
        store.insert(record.clone());
        store.fail_updates_to(JobStatus::Processing, 1);

        assert!(store.update(record.id, JobUpdate::processing()).await.is_err());
        assert!(store.update(record.id, JobUpdate::processing()).await.is_ok());
    }
}
