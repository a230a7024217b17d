use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::extract::PageMetadata;
use crate::job::{JobId, JobRecord, JobUpdate};
use crate::store::{CreateMode, JobStore, ScrapedContent};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed [`JobStore`].
///
/// Updates run inside a transaction that locks the row, applies
/// [`JobRecord::apply`] and writes the result back, so the state machine
/// holds across concurrent workers.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `scrape_jobs` and `scraped_content` tables if missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_jobs (
                id UUID PRIMARY KEY,
                url TEXT NOT NULL,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS scrape_jobs_created_at_idx
                ON scrape_jobs (created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraped_content (
                job_id UUID PRIMARY KEY REFERENCES scrape_jobs (id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                links JSONB NOT NULL,
                images JSONB NOT NULL,
                metadata JSONB NOT NULL,
                scraped_at TIMESTAMPTZ NOT NULL,
                processing_time_ms BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: &PgRow) -> anyhow::Result<JobRecord> {
        let priority: String = row.try_get("priority")?;
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let max_retries: i32 = row.try_get("max_retries")?;

        Ok(JobRecord {
            id: JobId(row.try_get("id")?),
            url: row.try_get("url")?,
            priority: priority.parse()?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: u32::try_from(retry_count)?,
            max_retries: u32::try_from(max_retries)?,
            error_message: row.try_get("error_message")?,
        })
    }

    fn content_from_row(row: &PgRow) -> anyhow::Result<ScrapedContent> {
        let links: serde_json::Value = row.try_get("links")?;
        let images: serde_json::Value = row.try_get("images")?;
        let metadata: serde_json::Value = row.try_get("metadata")?;
        let processing_time_ms: i64 = row.try_get("processing_time_ms")?;
        let scraped_at: DateTime<Utc> = row.try_get("scraped_at")?;

        Ok(ScrapedContent {
            job_id: JobId(row.try_get("job_id")?),
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            text: row.try_get("content")?,
            links: serde_json::from_value(links)?,
            images: serde_json::from_value(images)?,
            metadata: serde_json::from_value::<PageMetadata>(metadata)?,
            scraped_at,
            processing_time_ms: u64::try_from(processing_time_ms)?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(
        &self,
        record: &JobRecord,
        mode: CreateMode,
    ) -> anyhow::Result<()> {
        let conflict = match mode {
            CreateMode::FailIfExists => "",
            CreateMode::Overwrite => {
                r#"
                ON CONFLICT (id) DO UPDATE SET
                    url = EXCLUDED.url,
                    priority = EXCLUDED.priority,
                    status = EXCLUDED.status,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    completed_at = EXCLUDED.completed_at,
                    retry_count = EXCLUDED.retry_count,
                    max_retries = EXCLUDED.max_retries,
                    error_message = EXCLUDED.error_message
                "#
            }
        };
        let sql = format!(
            r#"
            INSERT INTO scrape_jobs (
                id, url, priority, status, created_at, updated_at,
                completed_at, retry_count, max_retries, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            {conflict}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(record.id.0)
            .bind(&record.url)
            .bind(record.priority.as_str())
            .bind(record.status.as_str())
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.completed_at)
            .bind(i32::try_from(record.retry_count)?)
            .bind(i32::try_from(record.max_retries)?)
            .bind(&record.error_message)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(StoreError::AlreadyExists(record.id).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM scrape_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn update(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> anyhow::Result<JobRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM scrape_jobs WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            drop(tx.rollback().await);
            return Err(StoreError::NotFound(id).into());
        };

        let mut record = Self::record_from_row(&row)?;
        if let Err(error) = record.apply(&update) {
            drop(tx.rollback().await);
            return Err(StoreError::Transition { id, error }.into());
        }

        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = $2,
                retry_count = $3,
                completed_at = $4,
                error_message = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(record.status.as_str())
        .bind(i32::try_from(record.retry_count)?)
        .bind(record.completed_at)
        .bind(&record.error_message)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job_id = %id, status = %record.status, "job record updated");
        Ok(record)
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM scrape_jobs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn save_content(&self, content: &ScrapedContent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_content (
                job_id, url, title, content, links, images, metadata,
                scraped_at, processing_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                links = EXCLUDED.links,
                images = EXCLUDED.images,
                metadata = EXCLUDED.metadata,
                scraped_at = EXCLUDED.scraped_at,
                processing_time_ms = EXCLUDED.processing_time_ms
            "#,
        )
        .bind(content.job_id.0)
        .bind(&content.url)
        .bind(&content.title)
        .bind(&content.text)
        .bind(serde_json::to_value(&content.links)?)
        .bind(serde_json::to_value(&content.images)?)
        .bind(serde_json::to_value(&content.metadata)?)
        .bind(content.scraped_at)
        .bind(i64::try_from(content.processing_time_ms)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_content(
        &self,
        id: JobId,
    ) -> anyhow::Result<Option<ScrapedContent>> {
        let row = sqlx::query("SELECT * FROM scraped_content WHERE job_id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::content_from_row).transpose()
    }
}
