use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Hackaplan.
#[derive(Error, Debug)]
pub enum AppError {
    /// The submitted URL is not a hackathon page on the target site.
    #[error("Invalid hackathon URL: {0}")]
    InvalidUrl(String),

    /// Caller exceeded its admission quota.
    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The target site answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Server hint from a `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single request attempt timed out.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The response body could not be read or decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Retries for a URL were exhausted or the failure was permanent.
    #[error("Fetch failed for {url} after {attempts} attempt(s): {message}")]
    FetchFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    /// A page fetched fine but could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The whole lookup exceeded its hard time limit.
    #[error("Lookup exceeded the {}s time limit", .0.as_secs())]
    JobTimeout(Duration),

    #[error("Lookup not found: {0}")]
    JobNotFound(String),

    /// Attempted job status change that the state machine forbids.
    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Server-supplied wait hint, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after } => Some(*retry_after),
            AppError::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable, client-facing classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidUrl(_) => ErrorCode::InvalidUrl,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::HttpStatus { .. }
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::MalformedResponse(_)
            | AppError::FetchFailed { .. } => ErrorCode::FetchError,
            AppError::ParseError(_) => ErrorCode::ParseError,
            AppError::JobTimeout(_) => ErrorCode::Timeout,
            AppError::JobNotFound(_) => ErrorCode::JobNotFound,
            AppError::InvalidTransition(_)
            | AppError::DatabaseError(_)
            | AppError::SerializationError(_)
            | AppError::ConfigError(_)
            | AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Error taxonomy exposed on terminal job records, `failed` events and HTTP bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidUrl,
    RateLimited,
    FetchError,
    ParseError,
    Timeout,
    JobNotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "invalid_url",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::FetchError => "fetch_error",
            ErrorCode::ParseError => "parse_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::JobNotFound => "job_not_found",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_url" => Ok(ErrorCode::InvalidUrl),
            "rate_limited" => Ok(ErrorCode::RateLimited),
            "fetch_error" => Ok(ErrorCode::FetchError),
            "parse_error" => Ok(ErrorCode::ParseError),
            "timeout" => Ok(ErrorCode::Timeout),
            "job_not_found" => Ok(ErrorCode::JobNotFound),
            "internal_error" => Ok(ErrorCode::InternalError),
            _ => Err(format!("Unknown error code: {s}")),
        }
    }
}
