//! Scrapeq - asynchronous scrape-job pipeline.
//!
//! Scrape requests are recorded in a job store, enqueued on a message queue
//! and processed by workers that extract page content, persist it, and report
//! every lifecycle change to status observers.
//!
//! # Core Concepts
//!
//! - **Job**: A [`JobRecord`] is the durable state of one scrape request. Its
//!   [`JobStatus`] only moves along the edges allowed by
//!   [`JobStatus::can_transition_to`]; terminal records never change again.
//!
//! - **Queue**: The [`QueuePort`] trait abstracts an at-least-once queue with
//!   visibility timeouts, delayed sends and a dead-letter destination.
//!
//! - **Store**: The [`JobStore`] trait persists records and scraped content.
//!   Every update goes through [`JobRecord::apply`].
//!
//! - **Extraction**: An [`Extractor`] turns a URL into [`ExtractedContent`].
//!   [`TieredExtractor`] falls back to a rendering tier for thin pages and
//!   [`BoundedExtractor`] caps concurrent page loads.
//!
//! - **Retry**: [`RetryPolicy`] decides between a delayed re-send with
//!   exponential backoff and dead-lettering once the retry budget is spent.
//!
//! - **Status**: [`StatusEvent`]s flow through a [`StatusChannel`], usually a
//!   [`FanOut`] over several [`StatusSink`]s.
//!
//! - **Runtime**: [`ScrapeWorker`] polls the queue, processes deliveries with
//!   bounded concurrency, and drains in-flight work on shutdown.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL job store via sqlx
//! - `redis` - Redis pub/sub status sink
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scrapeq::*;
//!
//! let status: Arc<dyn StatusChannel> = Arc::new(FanOut::new().with_sink(Arc::new(LogSink)));
//! let submitter = JobSubmitter::new(queue.clone(), store.clone(), status.clone(), 3);
//! submitter.submit("https://example.com", JobPriority::High).await?;
//!
//! let worker = ScrapeWorkerBuilder::new(WorkerConfig::from_env())
//!     .with_queue(queue)
//!     .with_store(store)
//!     .with_extractor(extractor)
//!     .with_status(status)
//!     .build()?;
//! worker.run().await?;
//! ```

/// Worker and extractor configuration.
///
/// The `config` module defines [`WorkerConfig`] (batch size, concurrency,
/// poll and backoff timings) and [`ExtractorConfig`], loadable from the
/// environment.
pub mod config;

/// Error taxonomy for the pipeline.
///
/// Each boundary has its own enum: [`TransitionError`] for the state
/// machine, [`MessageError`] for queue bodies, [`ExtractError`] for page
/// loads, [`StoreError`] for persistence, and [`SubmitError`] and
/// [`BuildError`] for the public entry points.
pub mod error;

/// Status events and their delivery.
///
/// The `events` module provides:
/// - [`StatusEvent`] and [`EventStatus`] - the observer-facing payload
/// - [`StatusChannel`] - infallible publish used by the pipeline
/// - [`FanOut`] - delivers to every registered [`StatusSink`]
/// - [`BroadcastSink`] and [`LogSink`] - in-process sinks
pub mod events;

/// Page extraction.
///
/// The `extract` module defines the [`Extractor`] trait, the static HTML
/// tier ([`StaticExtractor`]), and the [`TieredExtractor`] and
/// [`BoundedExtractor`] combinators.
pub mod extract;

/// Job records and the status state machine.
///
/// The `job` module defines:
/// - [`JobId`] - unique job identifier
/// - [`JobPriority`] - low, medium or high
/// - [`JobStatus`] - lifecycle states and allowed transitions
/// - [`JobRecord`] and [`JobUpdate`] - durable state and partial updates
pub mod job;

/// Queue message body and delivery envelope.
///
/// The `message` module defines [`QueueMessage`] (the JSON body carried on
/// the queue), [`Envelope`] (one delivery) and [`DeliveryReceipt`].
pub mod message;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
///
/// The `metrics` module owns a dedicated registry with counters for
/// submissions and processed messages, gauges for in-flight work and queue
/// depth, and an extraction latency histogram.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed [`JobStore`] when
/// the `postgres` feature is enabled.
pub mod persistence;

/// Queue port and depth snapshots.
///
/// The `queue` module defines the [`QueuePort`] trait implemented by queue
/// backends and [`QueueSnapshot`] for monitoring queue depth.
pub mod queue;

/// Retry and dead-letter policy.
///
/// The `retry` module provides [`RetryPolicy`] and [`RetryDecision`].
pub mod retry;

/// Runtime orchestration and worker management.
///
/// The `runtime` module provides:
/// - [`ScrapeWorker`] - the queue consumer
/// - [`ScrapeWorkerBuilder`] - dependency wiring
/// - [`ShutdownToken`] - graceful shutdown signaling
/// - [`ProcessOutcome`] - what happened to a single delivery
pub mod runtime;

/// Job store port.
///
/// The `store` module defines the [`JobStore`] trait and [`ScrapedContent`].
pub mod store;

/// Job submission.
///
/// The `submit` module provides [`JobSubmitter`], which records a job,
/// enqueues its message and publishes the initial `queued` event.
pub mod submit;

/// Tracing spans and metric hooks.
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use events::*;
pub use extract::*;
pub use job::*;
pub use message::*;
pub use queue::*;
pub use retry::*;
pub use runtime::*;
pub use store::*;
pub use submit::*;
