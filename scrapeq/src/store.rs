use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::{ExtractedContent, PageMetadata};
use crate::job::{JobId, JobRecord, JobUpdate};

/// How [`JobStore::create`] treats an id that already exists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CreateMode {
    #[default]
    FailIfExists,
    Overwrite,
}

/// Trait for the durable record store.
///
/// `update` must apply [`JobRecord::apply`] atomically against the stored
/// record, so concurrent writers never see a half-applied transition.
/// Adapters report domain failures as [`StoreError`](crate::error::StoreError)
/// inside the `anyhow::Error`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record.
    async fn create(
        &self,
        record: &JobRecord,
        mode: CreateMode,
    ) -> anyhow::Result<()>;

    /// Fetch a record by id.
    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>>;

    /// Apply a partial update and return the stored result.
    async fn update(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> anyhow::Result<JobRecord>;

    /// Most recently created records first.
    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<JobRecord>>;

    /// Store extracted content, replacing any earlier copy for the job.
    async fn save_content(&self, content: &ScrapedContent) -> anyhow::Result<()>;

    /// Fetch stored content for a job.
    async fn get_content(
        &self,
        id: JobId,
    ) -> anyhow::Result<Option<ScrapedContent>>;
}

/// Content stored alongside a completed job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedContent {
    pub job_id: JobId,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: PageMetadata,
    pub scraped_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl ScrapedContent {
    pub fn new(
        job_id: JobId,
        url: impl Into<String>,
        extracted: ExtractedContent,
        processing_time: Duration,
    ) -> Self {
        Self {
            job_id,
            url: url.into(),
            title: extracted.title,
            text: extracted.text,
            links: extracted.links,
            images: extracted.images,
            metadata: extracted.metadata,
            scraped_at: Utc::now(),
            processing_time_ms: processing_time.as_millis() as u64,
        }
    }
}
