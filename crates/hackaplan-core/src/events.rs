//! Progress event vocabulary.
//!
//! Every event travels as `{event_type, timestamp, payload}`. The payload
//! shape is fixed per `event_type`, so the variants below are the complete
//! catalogue.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::models::{ItemWarning, WinnerProject};
use crate::util::timestamp;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ValidateUrl,
    FetchListingPage,
    CrawlProjectGallery,
    FilterWinners,
    ScrapeWinnerDetail,
    AssembleResult,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ValidateUrl => "validate_url",
            Stage::FetchListingPage => "fetch_listing_page",
            Stage::CrawlProjectGallery => "crawl_project_gallery",
            Stage::FilterWinners => "filter_winners",
            Stage::ScrapeWinnerDetail => "scrape_winner_detail",
            Stage::AssembleResult => "assemble_result",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    Queued {
        lookup_id: Uuid,
        hackathon_url: String,
    },
    Started {
        lookup_id: Uuid,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
    },
    GalleryPageScanned {
        page_url: String,
        page_number: u32,
        scanned_projects: u32,
        winners_found_on_page: u32,
        next_page_url: Option<String>,
    },
    GalleryTruncated {
        max_pages: u32,
        next_page_url: String,
    },
    WinnerDetectionFallback {
        reason: String,
        candidate_projects: u32,
    },
    WinnersNotAnnounced {
        message: String,
    },
    WinnerProjectFound {
        project_title: String,
        project_url: String,
        software_id: Option<String>,
        preview_image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    WinnerProjectScraped {
        index: u32,
        total: u32,
        project_title: String,
        project_url: String,
        prize_count: u32,
        winner_project: Box<WinnerProject>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<ItemWarning>,
    },
    ProjectSkipped {
        project_url: String,
        warning: ItemWarning,
    },
    Completed {
        lookup_id: Uuid,
        winner_count: u32,
    },
    Failed {
        code: ErrorCode,
        message: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::Queued { .. } => "queued",
            EventPayload::Started { .. } => "started",
            EventPayload::StageStarted { .. } => "stage_started",
            EventPayload::StageCompleted { .. } => "stage_completed",
            EventPayload::GalleryPageScanned { .. } => "gallery_page_scanned",
            EventPayload::GalleryTruncated { .. } => "gallery_truncated",
            EventPayload::WinnerDetectionFallback { .. } => "winner_detection_fallback",
            EventPayload::WinnersNotAnnounced { .. } => "winners_not_announced",
            EventPayload::WinnerProjectFound { .. } => "winner_project_found",
            EventPayload::WinnerProjectScraped { .. } => "winner_project_scraped",
            EventPayload::ProjectSkipped { .. } => "project_skipped",
            EventPayload::Completed { .. } => "completed",
            EventPayload::Failed { .. } => "failed",
        }
    }

    /// `completed` and `failed` close a job's log.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Completed { .. } | EventPayload::Failed { .. }
        )
    }

    /// Split into the `(event_type, payload)` columns used for storage.
    pub fn to_parts(&self) -> Result<(&'static str, serde_json::Value), AppError> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or_else(|| serde_json::json!({}));
        Ok((self.event_type(), payload))
    }

    pub fn from_parts(event_type: &str, payload: serde_json::Value) -> Result<Self, AppError> {
        let tagged = serde_json::json!({ "event_type": event_type, "payload": payload });
        Ok(serde_json::from_value(tagged)?)
    }
}

/// One entry of a job's append-only progress log.
///
/// `seq` is the per-job position assigned by the store. It is not part of
/// the wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(skip)]
    pub seq: u64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }

    /// Dedup identity shared by both read paths: timestamp, type and payload.
    pub fn identity(&self) -> String {
        let payload = self
            .payload
            .to_parts()
            .map(|(_, p)| p.to_string())
            .unwrap_or_default();
        format!(
            "{}|{}|{}",
            crate::util::format_timestamp(&self.timestamp),
            self.event_type(),
            payload
        )
    }
}

/// Merge a polled log with a pushed stream the way a client would: drop
/// identical events and order by timestamp.
pub fn merge_event_streams(
    polled: impl IntoIterator<Item = ProgressEvent>,
    pushed: impl IntoIterator<Item = ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ProgressEvent> = polled
        .into_iter()
        .chain(pushed)
        .filter(|event| seen.insert(event.identity()))
        .collect();
    merged.sort_by_key(|event| event.timestamp);
    merged
}
