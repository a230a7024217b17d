use std::time::Duration;

use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Rejected state-machine move on a [`JobRecord`](crate::job::JobRecord).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The record already reached `completed` or `failed`.
    #[error("job is already {0} and accepts no further updates")]
    Terminal(JobStatus),
    /// The requested status is not reachable from the current one.
    #[error("illegal status transition {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },
    /// `retry_count` only ever grows.
    #[error("retry count cannot decrease from {current} to {requested}")]
    RetryCountDecreased { current: u32, requested: u32 },
    /// A non-terminal job may not carry more attempts than its budget.
    #[error(
        "retry count {retry_count} exceeds max retries {max_retries} while {status}"
    )]
    RetryBudgetExceeded {
        retry_count: u32,
        max_retries: u32,
        status: JobStatus,
    },
    /// `completed_at` is only written together with a terminal status.
    #[error("completedAt may only be set on a terminal transition")]
    CompletedAtOnNonTerminal,
}

/// A queue message body that can never be processed.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message has no body")]
    MissingBody,
    #[error("message body is not a valid job message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Failure of the extraction capability. Every variant is retryable.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("rendered extraction failed: {0}")]
    Render(String),
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by store adapters, wrapped in `anyhow::Error` at the port.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} already exists")]
    AlreadyExists(JobId),
    #[error("job {id}: {error}")]
    Transition { id: JobId, error: TransitionError },
}

/// Invalid [`WorkerConfig`](crate::config::WorkerConfig) values.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Missing dependencies when assembling a worker.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} dependency missing")]
    Missing(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a submission was refused or only partly recorded.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidUrl(#[from] MessageError),
    #[error("bulk submission of {count} urls exceeds the limit of {max}")]
    TooMany { count: usize, max: usize },
    #[error("failed to record job: {0:#}")]
    Store(anyhow::Error),
    #[error("failed to enqueue job {id}: {error:#}")]
    Queue { id: JobId, error: anyhow::Error },
}
