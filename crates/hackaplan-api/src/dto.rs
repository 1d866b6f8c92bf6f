use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hackaplan_client::HackathonSuggestion;
use hackaplan_core::error::AppError;
use hackaplan_core::events::ProgressEvent;
use hackaplan_core::job::{JobError, LookupJob};
use hackaplan_core::models::LookupResult;
use hackaplan_core::util::format_timestamp;

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateLookupRequest {
    /// Hackathon page, e.g. `https://example.devpost.com`
    pub hackathon_url: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateLookupResponse {
    pub lookup_id: Uuid,
    pub status: String,
}

impl From<&LookupJob> for CreateLookupResponse {
    fn from(job: &LookupJob) -> Self {
        Self {
            lookup_id: job.id,
            status: job.status.to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<JobError> for ErrorDetail {
    fn from(error: JobError) -> Self {
        Self {
            code: error.code.to_string(),
            message: error.message,
        }
    }
}

/// One progress frame, identical on the poll and push paths.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProgressEventResponse {
    pub event_type: String,
    pub timestamp: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl TryFrom<&ProgressEvent> for ProgressEventResponse {
    type Error = AppError;

    fn try_from(event: &ProgressEvent) -> Result<Self, Self::Error> {
        let (event_type, payload) = event.payload.to_parts()?;
        Ok(Self {
            event_type: event_type.to_string(),
            timestamp: format_timestamp(&event.timestamp),
            payload,
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LookupResponse {
    pub lookup_id: Uuid,
    pub hackathon_url: String,
    pub status: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub progress_events: Vec<ProgressEventResponse>,
    /// Same shape as a snapshot shard's `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
}

impl LookupResponse {
    pub fn build(
        job: LookupJob,
        events: &[ProgressEvent],
        result: Option<LookupResult>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            lookup_id: job.id,
            hackathon_url: job.hackathon_url,
            status: job.status.to_string(),
            created_at: format_timestamp(&job.created_at),
            started_at: job.started_at.as_ref().map(format_timestamp),
            finished_at: job.finished_at.as_ref().map(format_timestamp),
            error: job.error.map(ErrorDetail::from),
            progress_events: events
                .iter()
                .map(ProgressEventResponse::try_from)
                .collect::<Result<_, _>>()?,
            result: result.map(serde_json::to_value).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    /// 1 to 20, default 8
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SuggestionResponse {
    pub title: String,
    pub hackathon_url: String,
    pub gallery_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub open_state: Option<String>,
    pub winners_announced: Option<bool>,
    pub submission_period_dates: Option<String>,
    pub organization_name: Option<String>,
}

impl From<HackathonSuggestion> for SuggestionResponse {
    fn from(s: HackathonSuggestion) -> Self {
        Self {
            title: s.title,
            hackathon_url: s.hackathon_url,
            gallery_url: s.gallery_url,
            thumbnail_url: s.thumbnail_url,
            open_state: s.open_state,
            winners_announced: s.winners_announced,
            submission_period_dates: s.submission_period_dates,
            organization_name: s.organization_name,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchResponse {
    pub query: String,
    pub suggestions: Vec<SuggestionResponse>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Seconds to wait before retrying, on 429 only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
