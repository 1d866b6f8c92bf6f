use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::models::LookupResult;
use crate::util::{option_timestamp, timestamp};

/// Status of a lookup job.
///
/// `queued → started → {completed | failed}`; terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Queued or started: the job still owns a place in the queue.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Started)
                | (JobStatus::Started, JobStatus::Completed)
                | (JobStatus::Started, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Terminal error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&AppError> for JobError {
    fn from(err: &AppError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// A lookup job in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupJob {
    pub id: Uuid,
    /// Normalized hackathon URL.
    pub hackathon_url: String,
    pub status: JobStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "option_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "option_timestamp")]
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
}

impl LookupJob {
    pub fn new(hackathon_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            hackathon_url: hackathon_url.into(),
            status: JobStatus::Queued,
            created_at: crate::util::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// How a started job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(LookupResult),
    Failed(JobError),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed(_) => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Configuration for the lookup worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Hard ceiling on one pipeline run.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}
