use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobStatus, LookupJob};
use crate::progress::ProgressBus;
use crate::traits::LookupStore;
use crate::urls::normalize_hackathon_url;

/// Submission side of the scheduler's FIFO queue.
///
/// Job ids travel over an unbounded channel; the job record itself lives
/// in the store, so the queue never holds state the read paths can't see.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Uuid>,
}

impl JobQueue {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Uuid>) -> Self {
        Self { sender }
    }

    /// Hand a persisted queued job to the worker.
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), AppError> {
        self.sender
            .send(job_id)
            .map_err(|_| AppError::Internal("Lookup worker is not running".into()))
    }

    /// Validate the URL, persist a queued job with its `queued` event and
    /// enqueue it.
    pub async fn submit<S: LookupStore>(
        &self,
        bus: &ProgressBus<S>,
        raw_url: &str,
    ) -> Result<LookupJob, AppError> {
        let hackathon_url = normalize_hackathon_url(raw_url)?;
        let job = LookupJob::new(hackathon_url);
        bus.record_queued(&job).await?;
        self.enqueue(job.id)?;
        tracing::info!(job_id = %job.id, url = %job.hackathon_url, "Lookup queued");
        Ok(job)
    }

    /// [`find_reusable`], sending a reused queued job to the worker again.
    ///
    /// A queued job whose first send was lost would otherwise be handed
    /// out forever. The worker skips ids that are no longer queued, so the
    /// duplicate is harmless.
    pub async fn reuse<S: LookupStore>(
        &self,
        store: &S,
        hackathon_url: &str,
        ttl: Duration,
    ) -> Result<Option<LookupJob>, AppError> {
        let job = find_reusable(store, hackathon_url, ttl).await?;
        if let Some(job) = &job
            && job.status == JobStatus::Queued
        {
            self.enqueue(job.id)?;
        }
        Ok(job)
    }
}

/// An existing job that can answer a request for `hackathon_url`: an
/// active one, or one that completed within `ttl`.
pub async fn find_reusable<S: LookupStore>(
    store: &S,
    hackathon_url: &str,
    ttl: Duration,
) -> Result<Option<LookupJob>, AppError> {
    if let Some(active) = store.find_active_job(hackathon_url).await? {
        return Ok(Some(active));
    }
    if ttl.is_zero() {
        return Ok(None);
    }
    let ttl = chrono::TimeDelta::from_std(ttl)
        .map_err(|e| AppError::ConfigError(format!("Result reuse TTL out of range: {e}")))?;
    store
        .find_completed_since(hackathon_url, crate::util::now() - ttl)
        .await
}
