use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{EventPayload, ProgressEvent};
use crate::job::{JobOutcome, JobStatus, LookupJob};
use crate::models::{GalleryPage, ListingPage, LookupResult, WinnerProject};

/// Performs one HTTP GET attempt.
///
/// Retries and backoff live in [`crate::retry::RetryingFetcher`]; an
/// implementation only classifies the failure of a single attempt.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns fetched pages into structured data. Pure, no I/O.
pub trait Extractor: Send + Sync + Clone {
    fn parse_listing(&self, hackathon_url: &str, html: &str) -> Result<ListingPage, AppError>;

    fn parse_gallery(&self, page_url: &str, html: &str) -> Result<GalleryPage, AppError>;

    /// Parse a project page. Prizes are limited to those awarded by the
    /// hackathon at `hackathon_url`.
    fn parse_project(
        &self,
        project_url: &str,
        html: &str,
        hackathon_url: &str,
    ) -> Result<WinnerProject, AppError>;
}

/// Receives pipeline progress as it happens.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, payload: EventPayload) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Durable record of jobs, their progress logs, and results.
///
/// Event `seq` numbers are assigned here, per job, starting at 1. Methods
/// that change a job's status also append the event describing the change
/// in the same atomic write, so both read paths always agree.
pub trait LookupStore: Send + Sync + Clone + 'static {
    /// Insert a queued job together with its `queued` event.
    fn insert_job(
        &self,
        job: &LookupJob,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<ProgressEvent, AppError>> + Send;

    /// Move `queued → started` and append the `started` event.
    fn mark_started(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<ProgressEvent, AppError>> + Send;

    /// Move `started → completed|failed`, attach the result or error, and
    /// append the terminal event.
    fn mark_finished(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<ProgressEvent, AppError>> + Send;

    /// Append an event to an active job. Fails with `InvalidTransition`
    /// once the job is terminal.
    fn append_event(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<ProgressEvent, AppError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<LookupJob>, AppError>> + Send;

    /// Full log in append order.
    fn list_events(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ProgressEvent>, AppError>> + Send;

    /// Events with `seq > after_seq`, in append order.
    fn list_events_after(
        &self,
        job_id: Uuid,
        after_seq: u64,
    ) -> impl Future<Output = Result<Vec<ProgressEvent>, AppError>> + Send;

    fn get_result(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<LookupResult>, AppError>> + Send;

    /// Newest queued or started job for a normalized URL.
    fn find_active_job(
        &self,
        hackathon_url: &str,
    ) -> impl Future<Output = Result<Option<LookupJob>, AppError>> + Send;

    /// Newest job for the URL that completed at or after `since`.
    fn find_completed_since(
        &self,
        hackathon_url: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<LookupJob>, AppError>> + Send;

    /// Jobs in a status, oldest first.
    fn list_jobs_with_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<Vec<LookupJob>, AppError>> + Send;

    fn health_check(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Durable tally of admitted requests, so admission limits outlive the
/// process that granted them.
pub trait AdmissionLedger: Send + Sync {
    /// Count one admission for `identity` at `at`.
    fn record(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Admissions for `identity` at or after `since`, as `(latest possible
    /// instant, count)` pairs, oldest first. Granularity may be coarse; an
    /// implementation must never report an admission earlier than it was.
    fn admissions_since(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<(DateTime<Utc>, u32)>, AppError>> + Send;
}
