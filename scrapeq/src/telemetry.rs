//! Tracing spans and telemetry helpers for the scrape pipeline.
//!
//! Every helper logs through `tracing` and, with the `metrics` feature,
//! also updates the Prometheus collectors in [`crate::metrics`].
//!
//! # Spans
//!
//! - `scrapeq.receive`: one queue poll
//! - `scrapeq.process`: one delivery of one message
//! - `scrapeq.extract`: the extractor call inside a delivery
//! - `scrapeq.retry`: re-enqueue or dead-letter after a failure

use std::time::Duration;

use tracing::{Span, field, info_span};

use crate::job::{JobId, JobPriority};
use crate::queue::QueueSnapshot;

/// Span for a single receive call.
#[must_use]
pub fn receive_span(max_messages: usize) -> Span {
    info_span!("scrapeq.receive", max_messages, received = field::Empty)
}

/// Span for handling one delivery. `job_id` and `url` are recorded once the
/// body has been decoded.
#[must_use]
pub fn process_span(delivery_count: u32) -> Span {
    info_span!(
        "scrapeq.process",
        delivery_count,
        job_id = field::Empty,
        url = field::Empty,
        retry_count = field::Empty,
    )
}

#[must_use]
pub fn extract_span(job_id: JobId, url: &str) -> Span {
    info_span!("scrapeq.extract", job_id = %job_id, url = %url)
}

#[must_use]
pub fn retry_span(job_id: JobId, retry_count: u32, max_retries: u32) -> Span {
    info_span!(
        "scrapeq.retry",
        job_id = %job_id,
        retry_count,
        max_retries,
    )
}

pub fn record_job_submitted(job_id: JobId, priority: JobPriority) {
    tracing::info!(job_id = %job_id, priority = %priority, "job submitted");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_submitted(priority.as_str());
}

pub fn record_batch_received(count: usize) {
    tracing::debug!(count, "received message batch");

    #[cfg(feature = "metrics")]
    crate::metrics::record_messages_received(count);
}

/// Record how one delivery ended (`completed`, `retried`, `dead_lettered`,
/// `dropped`, `skipped` or `deferred`).
pub fn record_message_outcome(outcome: &str) {
    tracing::debug!(outcome, "message handled");

    #[cfg(feature = "metrics")]
    crate::metrics::record_message_outcome(outcome);
}

pub fn observe_extract_duration(outcome: &str, duration: Duration) {
    tracing::debug!(
        outcome,
        duration_ms = duration.as_millis() as u64,
        "extraction finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_extract_duration(outcome, duration.as_secs_f64());
}

pub fn set_in_flight(count: usize) {
    tracing::trace!(count, "in-flight messages");

    #[cfg(feature = "metrics")]
    crate::metrics::set_in_flight(count as f64);
}

pub fn set_queue_depth(snapshot: &QueueSnapshot) {
    tracing::debug!(
        available = snapshot.available,
        in_flight = snapshot.in_flight,
        delayed = snapshot.delayed,
        dead_lettered = snapshot.dead_lettered,
        "queue depth sampled"
    );

    #[cfg(feature = "metrics")]
    {
        crate::metrics::set_queue_depth("available", snapshot.available as f64);
        crate::metrics::set_queue_depth("in_flight", snapshot.in_flight as f64);
        crate::metrics::set_queue_depth("delayed", snapshot.delayed as f64);
        crate::metrics::set_queue_depth(
            "dead_lettered",
            snapshot.dead_lettered as f64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_span() {
        let span = receive_span(10);
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "scrapeq.receive");
        }
    }

    #[test]
    fn test_process_span_declares_deferred_fields() {
        let span = process_span(2);
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "scrapeq.process");
            assert!(metadata.fields().field("job_id").is_some());
            assert!(metadata.fields().field("url").is_some());
        }
    }

    #[test]
    fn test_extract_and_retry_spans() {
        let id = JobId::new();
        if let Some(metadata) = extract_span(id, "https://example.com").metadata() {
            assert_eq!(metadata.name(), "scrapeq.extract");
        }
        if let Some(metadata) = retry_span(id, 1, 3).metadata() {
            assert_eq!(metadata.name(), "scrapeq.retry");
        }
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_job_submitted(JobId::new(), JobPriority::High);
        record_batch_received(4);
        record_message_outcome("completed");
        observe_extract_duration("success", Duration::from_millis(120));
        set_in_flight(2);
        set_queue_depth(&QueueSnapshot::empty(chrono::Utc::now()));
    }
}
