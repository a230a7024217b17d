use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransitionError;

/// Retry budget applied when a submission does not name one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique job identifier (UUID v7, so ids sort by creation time).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Generate a new time-ordered job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Advisory priority carried through to events. Queue order ignores it.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl JobPriority {
    /// Lowercase name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
        }
    }
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(JobPriority::Low),
            "medium" => Ok(JobPriority::Medium),
            "high" => Ok(JobPriority::High),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Persisted lifecycle state of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting on the queue, first attempt or retry.
    Queued,
    /// A worker is extracting it.
    Processing,
    /// Content stored. Terminal.
    Completed,
    /// Retries exhausted. Terminal.
    Failed,
}

impl JobStatus {
    /// Lowercase name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal edges of the job lifecycle.
    ///
    /// `processing -> processing` covers redelivery after a worker died
    /// mid-job. The `queued -> *` edges beyond `processing` let a worker
    /// still land a retry or terminal write when its `processing` write was
    /// lost.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Completed | Failed, _) => false,
            (Queued, Processing) | (Processing, Processing) => true,
            (Processing, Queued) | (Processing, Completed | Failed) => true,
            (Queued, Queued | Completed | Failed) => true,
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when parsing an unrecognized status or priority name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);

/// Durable lifecycle of one scrape request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Create a `queued` record with a fresh id and no retries used.
    pub fn new(
        url: impl Into<String>,
        priority: JobPriority,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            url: url.into(),
            priority,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            completed_at: None,
            retry_count: 0,
            max_retries,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update, all or nothing.
    pub fn apply(&mut self, update: &JobUpdate) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let status = update.status.unwrap_or(self.status);
        if !self.status.can_transition_to(status) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: status,
            });
        }

        let retry_count = update.retry_count.unwrap_or(self.retry_count);
        if retry_count < self.retry_count {
            return Err(TransitionError::RetryCountDecreased {
                current: self.retry_count,
                requested: retry_count,
            });
        }
        if !status.is_terminal() && retry_count > self.max_retries {
            return Err(TransitionError::RetryBudgetExceeded {
                retry_count,
                max_retries: self.max_retries,
                status,
            });
        }
        if update.completed_at.is_some() && !status.is_terminal() {
            return Err(TransitionError::CompletedAtOnNonTerminal);
        }

        self.status = status;
        self.retry_count = retry_count;
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(error) = &update.error_message {
            self.error_message = Some(error.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update for [`JobRecord::apply`]; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub retry_count: Option<u32>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    /// Mark the job as picked up by a worker.
    pub fn processing() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            ..Self::default()
        }
    }

    /// Terminal success at `at`.
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    /// Back to `queued` with the incremented retry count and last error.
    pub fn retrying(retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Queued),
            retry_count: Some(retry_count),
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Terminal failure at `at`, keeping the final error.
    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            completed_at: Some(at),
            error_message: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(max_retries: u32) -> JobRecord {
        JobRecord::new("https://example.com", JobPriority::Medium, max_retries)
    }

    #[test]
    fn test_state_machine_edges() {
        use JobStatus::*;

        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Queued));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Failed));

        for next in [Queued, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_full_retry_lifecycle() {
        let mut job = record(1);
        job.apply(&JobUpdate::processing()).unwrap();
        job.apply(&JobUpdate::retrying(1, "boom")).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error_message.as_deref(), Some("boom"));

        job.apply(&JobUpdate::processing()).unwrap();
        let at = Utc::now();
        job.apply(&JobUpdate::failed("boom again", at)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(at));
    }

    #[test]
    fn test_terminal_rejects_every_update() {
        let mut job = record(3);
        job.apply(&JobUpdate::processing()).unwrap();
        job.apply(&JobUpdate::completed(Utc::now())).unwrap();
        let snapshot = job.clone();

        let err = job.apply(&JobUpdate::processing()).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(JobStatus::Completed));

        let err = job
            .apply(&JobUpdate {
                error_message: Some("late".into()),
                ..JobUpdate::default()
            })
            .unwrap_err();
        assert_eq!(err, TransitionError::Terminal(JobStatus::Completed));
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_retry_count_never_decreases() {
        let mut job = record(3);
        job.apply(&JobUpdate::retrying(2, "first")).unwrap();

        let err = job.apply(&JobUpdate::retrying(1, "second")).unwrap_err();
        assert_eq!(
            err,
            TransitionError::RetryCountDecreased {
                current: 2,
                requested: 1
            }
        );
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.error_message.as_deref(), Some("first"));
    }

    #[test]
    fn test_retry_budget_enforced_while_active() {
        let mut job = record(2);
        let err = job.apply(&JobUpdate::retrying(3, "over")).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::RetryBudgetExceeded {
                retry_count: 3,
                max_retries: 2,
                ..
            }
        ));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_completed_at_requires_terminal_status() {
        let mut job = record(3);
        let err = job
            .apply(&JobUpdate {
                status: Some(JobStatus::Processing),
                completed_at: Some(Utc::now()),
                ..JobUpdate::default()
            })
            .unwrap_err();
        assert_eq!(err, TransitionError::CompletedAtOnNonTerminal);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
        assert_eq!("high".parse::<JobPriority>().unwrap(), JobPriority::High);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let job = record(3);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["priority"], "medium");
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["maxRetries"], 3);
        assert!(value.get("completedAt").is_none());
    }
}
