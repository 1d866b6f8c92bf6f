//! Test utilities: fakes for every core trait.
//!
//! Handwritten fakes for dependency injection in unit and integration
//! tests. All of them share state through `Arc<Mutex<_>>` so a test can
//! keep a clone and assert on what happened.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::events::{EventPayload, ProgressEvent};
use crate::job::{JobError, JobOutcome, JobStatus, LookupJob};
use crate::models::{
    DescriptionSection, ExternalLink, GalleryEntry, GalleryPage, HackathonMetadata, ListingPage,
    LookupResult, PrizeAward, TeamMember, TechTag, WinnerProject,
};
use crate::traits::{Extractor, Fetcher, LookupStore, ProgressSink};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that replays scripted responses.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// FakeSite
// ---------------------------------------------------------------------------

/// One gallery card for [`FakeSite::with_hackathon`].
#[derive(Debug, Clone)]
pub struct FakeEntry {
    pub title: String,
    /// Shows a winner badge in the gallery.
    pub badge: bool,
    /// Its project page lists a prize from the hackathon.
    pub prize: bool,
}

impl FakeEntry {
    pub fn winner(title: &str) -> Self {
        Self {
            title: title.into(),
            badge: true,
            prize: true,
        }
    }

    pub fn plain(title: &str) -> Self {
        Self {
            title: title.into(),
            badge: false,
            prize: false,
        }
    }

    /// A winner whose gallery card lacks the badge.
    pub fn unbadged_winner(title: &str) -> Self {
        Self {
            title: title.into(),
            badge: false,
            prize: true,
        }
    }
}

/// Canonical project URL used by [`FakeSite`] for a title.
pub fn project_url(title: &str) -> String {
    format!("https://devpost.com/software/{}", slug(title))
}

fn slug(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

#[derive(Debug, Clone)]
enum FakePage {
    Listing(ListingPage),
    Gallery(GalleryPage),
    Project(WinnerProject),
}

#[derive(Debug, Clone, Copy)]
struct FakeFailure {
    status: u16,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, FakePage>,
    failures: HashMap<String, FakeFailure>,
    hangs: HashSet<String>,
    latency: Duration,
    fetch_log: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// An in-memory hackathon site implementing both [`Fetcher`] and
/// [`Extractor`].
///
/// Fetching returns the page URL as the body; extraction looks the
/// structured page up by URL. Failures, hangs and latency are injected per
/// URL.
#[derive(Clone, Default)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hackathon at `url` with one gallery page per inner vec.
    pub fn with_hackathon(self, url: &str, name: &str, pages: Vec<Vec<FakeEntry>>) -> Self {
        let gallery_url = format!("{url}/project-gallery");
        let page_url = |n: usize| {
            if n == 1 {
                gallery_url.clone()
            } else {
                format!("{gallery_url}?page={n}")
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            state.pages.insert(
                url.to_string(),
                FakePage::Listing(ListingPage {
                    name: name.to_string(),
                    gallery_url: gallery_url.clone(),
                    winners_announced: true,
                }),
            );

            let total = pages.len();
            for (i, entries) in pages.into_iter().enumerate() {
                let n = i + 1;
                let gallery = GalleryPage {
                    scanned_projects: entries.len() as u32,
                    next_page_url: (n < total).then(|| page_url(n + 1)),
                    entries: entries
                        .iter()
                        .map(|entry| GalleryEntry {
                            project_title: entry.title.clone(),
                            project_url: project_url(&entry.title),
                            software_id: Some(slug(&entry.title)),
                            preview_image_url: None,
                            is_winner: entry.badge,
                        })
                        .collect(),
                };
                state
                    .pages
                    .insert(page_url(n), FakePage::Gallery(gallery));

                for entry in &entries {
                    let prizes = if entry.prize {
                        vec![PrizeAward {
                            hackathon_name: name.to_string(),
                            hackathon_url: Some(url.to_string()),
                            prize_name: "Grand Prize".into(),
                        }]
                    } else {
                        Vec::new()
                    };
                    let mut project = sample_winner(&entry.title);
                    project.prizes = prizes;
                    state
                        .pages
                        .insert(project_url(&entry.title), FakePage::Project(project));
                }
            }
        }
        self
    }

    /// Make the listing at `url` say winners are still pending.
    pub fn winners_pending(self, url: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(FakePage::Listing(listing)) = state.pages.get_mut(url) {
                listing.winners_announced = false;
            }
        }
        self
    }

    /// Every fetch of `url` answers with `status`.
    pub fn fail_with_status(&self, url: &str, status: u16) {
        self.state.lock().unwrap().failures.insert(
            url.to_string(),
            FakeFailure {
                status,
                remaining: None,
            },
        );
    }

    /// The next `times` fetches of `url` answer with `status`.
    pub fn fail_times(&self, url: &str, status: u16, times: u32) {
        self.state.lock().unwrap().failures.insert(
            url.to_string(),
            FakeFailure {
                status,
                remaining: Some(times),
            },
        );
    }

    /// Fetches of `url` never complete.
    pub fn hang(&self, url: &str) {
        self.state.lock().unwrap().hangs.insert(url.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.fetch_log.iter().filter(|u| *u == url).count()
    }

    pub fn total_fetches(&self) -> usize {
        self.state.lock().unwrap().fetch_log.len()
    }

    pub fn fetch_log(&self) -> Vec<String> {
        self.state.lock().unwrap().fetch_log.clone()
    }

    /// Highest number of fetches that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn page(&self, url: &str) -> Option<FakePage> {
        self.state.lock().unwrap().pages.get(url).cloned()
    }
}

struct InFlight<'a>(&'a Mutex<SiteState>);

impl<'a> InFlight<'a> {
    fn enter(state: &'a Mutex<SiteState>) -> Self {
        let mut guard = state.lock().unwrap();
        guard.in_flight += 1;
        guard.max_in_flight = guard.max_in_flight.max(guard.in_flight);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.in_flight -= 1;
        }
    }
}

impl Fetcher for FakeSite {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, AppError> {
        let _in_flight = InFlight::enter(&self.state);
        let (latency, hangs, failure, known) = {
            let mut state = self.state.lock().unwrap();
            state.fetch_log.push(url.to_string());
            let failure = match state.failures.get_mut(url) {
                Some(FakeFailure {
                    remaining: Some(0), ..
                }) => None,
                Some(failure) => {
                    if let Some(remaining) = failure.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    Some(failure.status)
                }
                None => None,
            };
            (
                state.latency,
                state.hangs.contains(url),
                failure,
                state.pages.contains_key(url),
            )
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let status = failure.or((!known).then_some(404));
        match status {
            Some(status) => Err(AppError::HttpStatus {
                status,
                url: url.to_string(),
                retry_after: None,
            }),
            None => Ok(url.to_string()),
        }
    }
}

impl Extractor for FakeSite {
    fn parse_listing(&self, hackathon_url: &str, _html: &str) -> Result<ListingPage, AppError> {
        match self.page(hackathon_url) {
            Some(FakePage::Listing(listing)) => Ok(listing),
            _ => Err(AppError::ParseError(format!("No listing at {hackathon_url}"))),
        }
    }

    fn parse_gallery(&self, page_url: &str, _html: &str) -> Result<GalleryPage, AppError> {
        match self.page(page_url) {
            Some(FakePage::Gallery(gallery)) => Ok(gallery),
            _ => Err(AppError::ParseError(format!("No gallery at {page_url}"))),
        }
    }

    fn parse_project(
        &self,
        project_url: &str,
        _html: &str,
        _hackathon_url: &str,
    ) -> Result<WinnerProject, AppError> {
        match self.page(project_url) {
            Some(FakePage::Project(project)) => Ok(project),
            _ => Err(AppError::ParseError(format!("No project at {project_url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as creation order.
    jobs: Vec<LookupJob>,
    events: HashMap<Uuid, Vec<ProgressEvent>>,
    results: HashMap<Uuid, LookupResult>,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut LookupJob, AppError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
    }

    fn push_event(
        &mut self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> ProgressEvent {
        let log = self.events.entry(job_id).or_default();
        let event = ProgressEvent {
            seq: log.len() as u64 + 1,
            timestamp,
            payload: payload.clone(),
        };
        log.push(event.clone());
        event
    }
}

/// In-memory [`LookupStore`] with the same transition guards as the SQL one.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }
}

fn transition_error(job: &LookupJob, next: JobStatus) -> AppError {
    AppError::InvalidTransition(format!(
        "job {} cannot move from {} to {}",
        job.id, job.status, next
    ))
}

impl LookupStore for MemoryStore {
    async fn insert_job(
        &self,
        job: &LookupJob,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.jobs.iter().any(|j| j.id == job.id) {
            return Err(AppError::DatabaseError(format!("duplicate job id {}", job.id)));
        }
        state.jobs.push(job.clone());
        Ok(state.push_event(job.id, timestamp, payload))
    }

    async fn mark_started(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state.job_mut(job_id)?;
        if !job.status.can_transition_to(JobStatus::Started) {
            return Err(transition_error(job, JobStatus::Started));
        }
        job.status = JobStatus::Started;
        job.started_at = Some(timestamp);
        Ok(state.push_event(job_id, timestamp, payload))
    }

    async fn mark_finished(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state.job_mut(job_id)?;
        let next = outcome.status();
        if !job.status.can_transition_to(next) {
            return Err(transition_error(job, next));
        }
        job.status = next;
        job.finished_at = Some(timestamp);
        match outcome {
            JobOutcome::Completed(result) => {
                state.results.insert(job_id, result.clone());
            }
            JobOutcome::Failed(error) => job.error = Some(error.clone()),
        }
        Ok(state.push_event(job_id, timestamp, payload))
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state.job_mut(job_id)?;
        if job.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} is {} and accepts no more events",
                job.status
            )));
        }
        Ok(state.push_event(job_id, timestamp, payload))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<LookupJob>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_events(&self, job_id: Uuid) -> Result<Vec<ProgressEvent>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.events.get(&job_id).cloned().unwrap_or_default())
    }

    async fn list_events_after(
        &self,
        job_id: Uuid,
        after_seq: u64,
    ) -> Result<Vec<ProgressEvent>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .get(&job_id)
            .map(|log| log.iter().filter(|e| e.seq > after_seq).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<LookupResult>, AppError> {
        Ok(self.state.lock().unwrap().results.get(&job_id).cloned())
    }

    async fn find_active_job(&self, hackathon_url: &str) -> Result<Option<LookupJob>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .rev()
            .find(|j| j.hackathon_url == hackathon_url && j.status.is_active())
            .cloned())
    }

    async fn find_completed_since(
        &self,
        hackathon_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LookupJob>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|j| {
                j.hackathon_url == hackathon_url
                    && j.status == JobStatus::Completed
                    && j.finished_at.is_some_and(|at| at >= since)
            })
            .max_by_key(|j| j.finished_at)
            .cloned())
    }

    async fn list_jobs_with_status(&self, status: JobStatus) -> Result<Vec<LookupJob>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Poll `store` until the job is terminal.
pub async fn wait_for_terminal<S: LookupStore>(store: &S, job_id: Uuid) -> LookupJob {
    loop {
        if let Some(job) = store.get_job(job_id).await.unwrap()
            && job.status.is_terminal()
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Progress sink that keeps every payload.
#[derive(Clone, Default)]
pub struct RecordingSink {
    payloads: Arc<Mutex<Vec<EventPayload>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.event_type().to_string())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    async fn emit(&self, payload: EventPayload) -> Result<(), AppError> {
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records events.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started => "Started",
            WorkerEvent::Recovered { .. } => "Recovered",
            WorkerEvent::JobStarted { .. } => "JobStarted",
            WorkerEvent::JobSkipped { .. } => "JobSkipped",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::ShuttingDown => "ShuttingDown",
            WorkerEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A fully detailed winner record.
pub fn sample_winner(title: &str) -> WinnerProject {
    let slug = slug(title);
    WinnerProject {
        project_title: title.to_string(),
        project_url: project_url(title),
        tagline: Some(format!("{title} in one line")),
        preview_image_url: Some(format!("https://img.devpost.test/{slug}.png")),
        prizes: vec![PrizeAward {
            hackathon_name: "Example Hack".into(),
            hackathon_url: Some("https://example.devpost.com".into()),
            prize_name: "Grand Prize".into(),
        }],
        team_members: vec![TeamMember {
            name: "Ada".into(),
            profile_url: Some("https://devpost.com/ada".into()),
        }],
        built_with: vec![TechTag {
            name: "rust".into(),
            url: None,
        }],
        external_links: vec![ExternalLink {
            label: "github.com".into(),
            url: format!("https://github.com/example/{slug}"),
        }],
        description_sections: vec![DescriptionSection {
            heading: "Inspiration".into(),
            content: format!("Why we built {title}."),
        }],
        warning: None,
    }
}

/// A completed result with `winners` winners for example.devpost.com.
pub fn sample_result(winners: usize) -> LookupResult {
    let winners: Vec<WinnerProject> = (0..winners)
        .map(|i| sample_winner(&format!("Project {i}")))
        .collect();
    LookupResult {
        hackathon: HackathonMetadata {
            name: "Example Hack".into(),
            url: "https://example.devpost.com".into(),
            gallery_url: "https://example.devpost.com/project-gallery".into(),
            scanned_pages: 1,
            scanned_projects: winners.len() as u32 + 2,
            winner_count: winners.len() as u32,
            gallery_truncated: false,
        },
        winners,
        generated_at: crate::util::now(),
    }
}

/// A failed outcome with the given code.
pub fn failed(code: ErrorCode, message: &str) -> JobOutcome {
    JobOutcome::Failed(JobError::new(code, message))
}
