//! Prometheus metrics for the scrape pipeline, behind the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `scrapeq_jobs_submitted_total` - Jobs accepted by the submitter
//! - `scrapeq_messages_received_total` - Messages handed out by the queue
//! - `scrapeq_messages_processed_total` - Deliveries by outcome
//!
//! ## Gauges
//! - `scrapeq_in_flight_messages` - Deliveries currently being processed
//! - `scrapeq_queue_depth` - Last sampled queue depth by state
//!
//! ## Histograms
//! - `scrapeq_extract_duration_seconds` - Extractor call duration
#![cfg(feature = "metrics")]

use std::sync::LazyLock;

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, IntCounter, Opts, Registry,
    exponential_buckets,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `priority`
pub static JOBS_SUBMITTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "scrapeq_jobs_submitted_total",
        "Total number of jobs submitted",
    );
    CounterVec::new(opts, &["priority"])
        .expect("scrapeq_jobs_submitted_total metric creation failed")
});

pub static MESSAGES_RECEIVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "scrapeq_messages_received_total",
        "Total number of queue messages received",
    )
    .expect("scrapeq_messages_received_total metric creation failed")
});

/// Labels: `outcome` (completed, retried, dead_lettered, dropped, skipped, deferred)
pub static MESSAGES_PROCESSED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "scrapeq_messages_processed_total",
        "Total number of message deliveries handled",
    );
    CounterVec::new(opts, &["outcome"])
        .expect("scrapeq_messages_processed_total metric creation failed")
});

pub static IN_FLIGHT_MESSAGES: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "scrapeq_in_flight_messages",
        "Message deliveries currently being processed",
    )
    .expect("scrapeq_in_flight_messages metric creation failed")
});

/// Labels: `state` (available, in_flight, delayed, dead_lettered)
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("scrapeq_queue_depth", "Last sampled queue depth");
    GaugeVec::new(opts, &["state"])
        .expect("scrapeq_queue_depth metric creation failed")
});

/// Labels: `outcome` (success, error, timeout)
pub static EXTRACT_DURATION_SECONDS: LazyLock<HistogramVec> =
    LazyLock::new(|| {
        let buckets = exponential_buckets(0.01, 2.0, 14)
            .expect("bucket creation failed");
        let opts = prometheus::HistogramOpts::new(
            "scrapeq_extract_duration_seconds",
            "Extraction duration in seconds",
        )
        .buckets(buckets);
        HistogramVec::new(opts, &["outcome"])
            .expect("scrapeq_extract_duration_seconds metric creation failed")
    });

/// Register every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_SUBMITTED_TOTAL.clone())
            as Box<dyn prometheus::core::Collector>,
        Box::new(MESSAGES_RECEIVED_TOTAL.clone()),
        Box::new(MESSAGES_PROCESSED_TOTAL.clone()),
        Box::new(IN_FLIGHT_MESSAGES.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(EXTRACT_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_submitted(priority: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[priority]).inc();
}

pub fn record_messages_received(count: usize) {
    MESSAGES_RECEIVED_TOTAL.inc_by(count as u64);
}

pub fn record_message_outcome(outcome: &str) {
    MESSAGES_PROCESSED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn set_in_flight(count: f64) {
    IN_FLIGHT_MESSAGES.set(count);
}

pub fn set_queue_depth(state: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[state]).set(depth);
}

pub fn observe_extract_duration(outcome: &str, duration_secs: f64) {
    EXTRACT_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().expect("first registration");
        init_metrics().expect("second registration");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_job_submitted("medium");
        record_messages_received(3);
        record_message_outcome("completed");
        record_message_outcome("retried");
        observe_extract_duration("success", 0.25);
        set_in_flight(2.0);
        set_queue_depth("available", 7.0);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("scrapeq_jobs_submitted_total"));
        assert!(output.contains("scrapeq_messages_processed_total"));
        assert!(output.contains("scrapeq_extract_duration_seconds"));
        assert!(output.contains("scrapeq_queue_depth"));
    }
}
