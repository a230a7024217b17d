use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::SubmitError;
use crate::events::{EventData, EventStatus, StatusChannel, StatusEvent};
use crate::job::{JobPriority, JobRecord, JobUpdate};
use crate::message::{QueueMessage, validate_url};
use crate::queue::QueuePort;
use crate::store::{CreateMode, JobStore};
use crate::telemetry;

/// Largest batch accepted by [`JobSubmitter::submit_many`].
pub const MAX_BULK_SUBMISSION: usize = 1000;

/// Entry point for new scrape requests: record first, then enqueue.
pub struct JobSubmitter<Q, S>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
{
    queue: Arc<Q>,
    store: Arc<S>,
    status: Arc<dyn StatusChannel>,
    default_max_retries: u32,
}

impl<Q, S> fmt::Debug for JobSubmitter<Q, S>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSubmitter")
            .field("queue_type", &type_name::<Q>())
            .field("store_type", &type_name::<S>())
            .field("default_max_retries", &self.default_max_retries)
            .finish()
    }
}

impl<Q, S> JobSubmitter<Q, S>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        store: Arc<S>,
        status: Arc<dyn StatusChannel>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            queue,
            store,
            status,
            default_max_retries,
        }
    }

    pub async fn submit(
        &self,
        url: &str,
        priority: JobPriority,
    ) -> Result<JobRecord, SubmitError> {
        self.submit_with_retries(url, priority, self.default_max_retries)
            .await
    }

    /// Create a `queued` record, enqueue its message and publish `queued`.
    ///
    /// A record whose message could not be sent is failed right away so it
    /// never sits `queued` with nothing left to process it.
    pub async fn submit_with_retries(
        &self,
        url: &str,
        priority: JobPriority,
        max_retries: u32,
    ) -> Result<JobRecord, SubmitError> {
        let url = validate_url(url.trim())?;
        let record = JobRecord::new(url.as_str(), priority, max_retries);

        self.store
            .create(&record, CreateMode::FailIfExists)
            .await
            .map_err(SubmitError::Store)?;

        let message = QueueMessage::for_job(&record);
        if let Err(err) = self.queue.send(&message, Duration::ZERO).await {
            self.abandon(&record, &err).await;
            return Err(SubmitError::Queue {
                id: record.id,
                error: err,
            });
        }

        self.status
            .publish(StatusEvent::for_record(&record, EventStatus::Queued).with_data(
                EventData {
                    retry_count: Some(0),
                    max_retries: Some(record.max_retries),
                    ..EventData::default()
                },
            ))
            .await;
        telemetry::record_job_submitted(record.id, record.priority);
        Ok(record)
    }

    /// Submit up to [`MAX_BULK_SUBMISSION`] urls, one result per url in order.
    pub async fn submit_many<I, U>(
        &self,
        urls: I,
        priority: JobPriority,
    ) -> Result<Vec<Result<JobRecord, SubmitError>>, SubmitError>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let urls: Vec<U> = urls.into_iter().collect();
        if urls.len() > MAX_BULK_SUBMISSION {
            return Err(SubmitError::TooMany {
                count: urls.len(),
                max: MAX_BULK_SUBMISSION,
            });
        }

        let results = futures::future::join_all(
            urls.iter().map(|url| self.submit(url.as_ref(), priority)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(
            submitted = results.len() - failed,
            failed,
            "bulk submission finished"
        );
        Ok(results)
    }

    async fn abandon(&self, record: &JobRecord, cause: &anyhow::Error) {
        let error = format!("failed to enqueue: {cause:#}");
        tracing::error!(job_id = %record.id, "{error}");

        match self
            .store
            .update(record.id, JobUpdate::failed(error.as_str(), Utc::now()))
            .await
        {
            Ok(_) => {
                self.status
                    .publish(StatusEvent::for_record(record, EventStatus::Failed).with_data(
                        EventData {
                            error: Some(error),
                            ..EventData::default()
                        },
                    ))
                    .await;
            }
            Err(err) => {
                tracing::error!(
                    job_id = %record.id,
                    "failed to fail unenqueued job: {err:#}"
                );
            }
        }
    }
}
