use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;
use url::Url;

use crate::error::{ExtractError, StoreError, TransitionError};
use crate::events::{EventData, EventStatus, StatusChannel, StatusEvent};
use crate::extract::{ExtractedContent, Extractor};
use crate::job::{JobStatus, JobUpdate};
use crate::message::{Envelope, QueueMessage};
use crate::queue::QueuePort;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{JobStore, ScrapedContent};
use crate::telemetry;

/// How one delivery ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Content stored, job completed, message deleted.
    Completed,
    /// A follow-up message was sent and the original deleted.
    Retried { retry_count: u32, delay: Duration },
    /// Job failed terminally and the message was dead-lettered.
    DeadLettered,
    /// The body could never be processed; deleted without retry.
    Dropped(DropReason),
    /// The job needs no work from this delivery; deleted.
    Skipped(SkipReason),
    /// Left undeleted so the queue hands it out again.
    Deferred,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Completed => "completed",
            ProcessOutcome::Retried { .. } => "retried",
            ProcessOutcome::DeadLettered => "dead_lettered",
            ProcessOutcome::Dropped(_) => "dropped",
            ProcessOutcome::Skipped(_) => "skipped",
            ProcessOutcome::Deferred => "deferred",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownJob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyTerminal(JobStatus),
    /// The record already moved past this message's attempt.
    Superseded { record_retry_count: u32 },
}

enum Guard {
    Proceed,
    Stop(ProcessOutcome),
}

/// Handles a single delivery from decode to acknowledgment.
pub(crate) struct MessageHandler<Q, S, E> {
    queue: Arc<Q>,
    store: Arc<S>,
    extractor: Arc<E>,
    status: Arc<dyn StatusChannel>,
    policy: RetryPolicy,
    extract_timeout: Duration,
}

impl<Q, S, E> fmt::Debug for MessageHandler<Q, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("queue_type", &type_name::<Q>())
            .field("store_type", &type_name::<S>())
            .field("extractor_type", &type_name::<E>())
            .field("policy", &self.policy)
            .field("extract_timeout", &self.extract_timeout)
            .finish()
    }
}

impl<Q, S, E> MessageHandler<Q, S, E>
where
    Q: QueuePort + 'static,
    S: JobStore + 'static,
    E: Extractor + 'static,
{
    pub(crate) fn new(
        queue: Arc<Q>,
        store: Arc<S>,
        extractor: Arc<E>,
        status: Arc<dyn StatusChannel>,
        policy: RetryPolicy,
        extract_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            extractor,
            status,
            policy,
            extract_timeout,
        }
    }

    pub(crate) async fn handle(&self, envelope: Envelope) -> ProcessOutcome {
        let span = telemetry::process_span(envelope.delivery_count);
        let outcome = self.process(&envelope).instrument(span).await;
        telemetry::record_message_outcome(outcome.label());
        outcome
    }

    async fn process(&self, envelope: &Envelope) -> ProcessOutcome {
        let (message, url) = match envelope.decode() {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(
                    delivery_count = envelope.delivery_count,
                    "dropping unprocessable message: {err}"
                );
                self.ack(envelope).await;
                return ProcessOutcome::Dropped(DropReason::Malformed);
            }
        };

        let span = tracing::Span::current();
        span.record("job_id", tracing::field::display(message.job_id));
        span.record("url", message.url.as_str());
        span.record("retry_count", message.retry_count);

        if let Guard::Stop(outcome) = self.guard(&message).await {
            self.ack(envelope).await;
            return outcome;
        }

        if let Err(err) = self
            .store
            .update(message.job_id, JobUpdate::processing())
            .await
        {
            tracing::warn!("failed to mark job processing, continuing: {err:#}");
        }
        self.status
            .publish(StatusEvent::for_message(&message, EventStatus::Processing).with_data(
                EventData {
                    retry_count: Some(message.retry_count),
                    max_retries: Some(message.max_retries),
                    delivery_count: Some(envelope.delivery_count),
                    ..EventData::default()
                },
            ))
            .await;

        let started = Instant::now();
        let result = self
            .extract(&message, &url)
            .instrument(telemetry::extract_span(message.job_id, &message.url))
            .await;

        match result {
            Ok(content) => {
                self.complete(envelope, &message, content, started.elapsed())
                    .await
            }
            Err(err) => {
                tracing::warn!("extraction failed: {err}");
                self.fail(envelope, &message, err.to_string()).await
            }
        }
    }

    /// Idempotency guard run before any work for a delivery.
    async fn guard(&self, message: &QueueMessage) -> Guard {
        match self.store.get(message.job_id).await {
            Ok(Some(record)) if record.is_terminal() => {
                tracing::info!(
                    status = %record.status,
                    "job already finished, discarding duplicate delivery"
                );
                Guard::Stop(ProcessOutcome::Skipped(SkipReason::AlreadyTerminal(
                    record.status,
                )))
            }
            Ok(Some(record)) if record.retry_count > message.retry_count => {
                tracing::info!(
                    record_retry_count = record.retry_count,
                    "stale attempt superseded by a later retry, discarding"
                );
                Guard::Stop(ProcessOutcome::Skipped(SkipReason::Superseded {
                    record_retry_count: record.retry_count,
                }))
            }
            Ok(Some(_)) => Guard::Proceed,
            Ok(None) => {
                tracing::warn!("no record for job, dropping orphaned message");
                Guard::Stop(ProcessOutcome::Dropped(DropReason::UnknownJob))
            }
            Err(err) => {
                tracing::warn!("failed to read job before processing, continuing: {err:#}");
                Guard::Proceed
            }
        }
    }

    async fn extract(
        &self,
        message: &QueueMessage,
        url: &Url,
    ) -> Result<ExtractedContent, ExtractError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.extract_timeout,
            self.extractor.extract(url),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Timeout(self.extract_timeout)),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(ExtractError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        telemetry::observe_extract_duration(outcome, started.elapsed());
        tracing::debug!(job_id = %message.job_id, outcome, "extractor returned");
        result
    }

    async fn complete(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
        content: ExtractedContent,
        elapsed: Duration,
    ) -> ProcessOutcome {
        let title = content.title.clone();
        let scraped = ScrapedContent::new(message.job_id, &message.url, content, elapsed);
        if let Err(err) = self.store.save_content(&scraped).await {
            tracing::warn!("failed to save scraped content: {err:#}");
            return self
                .fail(
                    envelope,
                    message,
                    format!("failed to save scraped content: {err:#}"),
                )
                .await;
        }

        let update = JobUpdate::completed(Utc::now());
        if let Some(outcome) = self.write_terminal(envelope, message, update).await {
            return outcome;
        }

        self.status
            .publish(StatusEvent::for_message(message, EventStatus::Completed).with_data(
                EventData {
                    title,
                    retry_count: Some(message.retry_count),
                    delivery_count: Some(envelope.delivery_count),
                    ..EventData::default()
                },
            ))
            .await;
        self.ack(envelope).await;

        tracing::info!(
            processing_time_ms = scraped.processing_time_ms,
            "job completed"
        );
        ProcessOutcome::Completed
    }

    async fn fail(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
        error: String,
    ) -> ProcessOutcome {
        let span = telemetry::retry_span(
            message.job_id,
            message.retry_count,
            message.max_retries,
        );

        async move {
            match self.policy.decide(message.retry_count, message.max_retries) {
                RetryDecision::Retry { retry_count, delay } => {
                    self.retry(envelope, message, error, retry_count, delay).await
                }
                RetryDecision::DeadLetter { attempts } => {
                    self.dead_letter(envelope, message, error, attempts).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn retry(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
        error: String,
        retry_count: u32,
        delay: Duration,
    ) -> ProcessOutcome {
        let next = message.next_attempt(retry_count, error.as_str());
        if let Err(err) = self.queue.send(&next, delay).await {
            tracing::error!(
                "failed to re-enqueue job, leaving message for redelivery: {err:#}"
            );
            return ProcessOutcome::Deferred;
        }

        if let Err(err) = self
            .store
            .update(message.job_id, JobUpdate::retrying(retry_count, error.as_str()))
            .await
        {
            tracing::warn!("failed to record retry on job: {err:#}");
        }

        self.status
            .publish(StatusEvent::for_message(message, EventStatus::Retrying).with_data(
                EventData {
                    error: Some(error),
                    retry_count: Some(retry_count),
                    max_retries: Some(message.max_retries),
                    delivery_count: Some(envelope.delivery_count),
                    retry_in_ms: Some(delay.as_millis() as u64),
                    ..EventData::default()
                },
            ))
            .await;
        self.ack(envelope).await;

        tracing::info!(
            next_retry_count = retry_count,
            delay_ms = delay.as_millis() as u64,
            "job scheduled for retry"
        );
        ProcessOutcome::Retried { retry_count, delay }
    }

    async fn dead_letter(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
        error: String,
        attempts: u32,
    ) -> ProcessOutcome {
        let update = JobUpdate::failed(error.as_str(), Utc::now());
        if let Some(outcome) = self.write_terminal(envelope, message, update).await {
            return outcome;
        }

        self.status
            .publish(StatusEvent::for_message(message, EventStatus::Failed).with_data(
                EventData {
                    error: Some(error.clone()),
                    retry_count: Some(message.retry_count),
                    max_retries: Some(message.max_retries),
                    delivery_count: Some(envelope.delivery_count),
                    ..EventData::default()
                },
            ))
            .await;

        if let Err(err) = self.queue.dead_letter(message, &error).await {
            tracing::error!("failed to dead-letter message: {err:#}");
        }
        self.ack(envelope).await;

        tracing::warn!(attempts, "job failed after exhausting retries: {error}");
        ProcessOutcome::DeadLettered
    }

    /// Write a terminal update. `Some` means the delivery stops here.
    async fn write_terminal(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
        update: JobUpdate,
    ) -> Option<ProcessOutcome> {
        let err = match self.store.update(message.job_id, update).await {
            Ok(_) => return None,
            Err(err) => err,
        };

        let outcome = match err.downcast_ref::<StoreError>() {
            Some(StoreError::Transition {
                error: TransitionError::Terminal(status),
                ..
            }) => {
                tracing::info!(
                    status = %status,
                    "terminal write rejected, another delivery settled the job"
                );
                ProcessOutcome::Skipped(SkipReason::AlreadyTerminal(*status))
            }
            Some(StoreError::NotFound(_)) => {
                tracing::warn!("job record vanished before its terminal write");
                ProcessOutcome::Dropped(DropReason::UnknownJob)
            }
            _ => {
                tracing::error!(
                    "failed to write terminal status, leaving message for redelivery: {err:#}"
                );
                return Some(ProcessOutcome::Deferred);
            }
        };

        self.ack(envelope).await;
        Some(outcome)
    }

    async fn ack(&self, envelope: &Envelope) {
        if let Err(err) = self.queue.delete(&envelope.receipt).await {
            tracing::warn!(receipt = %envelope.receipt, "failed to delete message: {err:#}");
        }
    }
}
