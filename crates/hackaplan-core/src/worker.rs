use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::job::{JobError, JobOutcome, JobStatus, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::pipeline::ScrapePipeline;
use crate::progress::{JobProgress, ProgressBus};
use crate::traits::{Extractor, Fetcher, LookupStore};

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started,
    Recovered {
        requeued: usize,
        interrupted: usize,
    },
    JobStarted {
        job_id: Uuid,
        url: &'a str,
    },
    JobSkipped {
        job_id: Uuid,
        status: Option<JobStatus>,
    },
    JobCompleted {
        job_id: Uuid,
        winner_count: usize,
    },
    JobFailed {
        job_id: Uuid,
        code: ErrorCode,
        error: &'a str,
    },
    ShuttingDown,
    Stopped,
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started => {
                tracing::info!("Lookup worker started");
            }
            WorkerEvent::Recovered {
                requeued,
                interrupted,
            } => {
                tracing::info!(%requeued, %interrupted, "Recovered jobs from previous run");
            }
            WorkerEvent::JobStarted { job_id, url } => {
                tracing::info!(%job_id, %url, "Processing lookup");
            }
            WorkerEvent::JobSkipped { job_id, status } => {
                tracing::debug!(%job_id, ?status, "Skipping job that is no longer queued");
            }
            WorkerEvent::JobCompleted {
                job_id,
                winner_count,
            } => {
                tracing::info!(%job_id, %winner_count, "Lookup completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                code,
                error,
            } => {
                tracing::warn!(%job_id, %code, %error, "Lookup failed");
            }
            WorkerEvent::ShuttingDown => {
                tracing::info!("Lookup worker shutting down");
            }
            WorkerEvent::Stopped => {
                tracing::info!("Lookup worker stopped");
            }
        }
    }
}

/// Single-concurrency FIFO scheduler.
///
/// Owns the only pipeline executor: job ids arrive over the queue and are
/// processed one at a time, each under a hard timeout. Admission and
/// reads never wait on it.
pub struct LookupScheduler<S, F, E>
where
    S: LookupStore,
    F: Fetcher,
    E: Extractor,
{
    bus: ProgressBus<S>,
    pipeline: Arc<ScrapePipeline<F, E>>,
    config: WorkerConfig,
}

impl<S, F, E> LookupScheduler<S, F, E>
where
    S: LookupStore,
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    pub fn new(bus: ProgressBus<S>, pipeline: ScrapePipeline<F, E>, config: WorkerConfig) -> Self {
        Self {
            bus,
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// Spawn the worker task and return the handle used to submit work and
    /// stop it.
    pub fn start<WR: WorkerReporter + 'static>(self, reporter: WR) -> SchedulerHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { self.run(receiver, cancel, &reporter).await })
        };
        SchedulerHandle {
            queue: JobQueue::new(sender),
            cancel,
            task,
        }
    }

    /// Run the worker loop until cancellation or until every queue handle
    /// is dropped.
    pub async fn run<WR: WorkerReporter>(
        &self,
        mut receiver: mpsc::UnboundedReceiver<Uuid>,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started);

        let mut backlog = self.recover(reporter).await?;

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let next = match backlog.pop_front() {
                Some(job_id) => Some(job_id),
                None => tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => None,
                    job_id = receiver.recv() => job_id,
                },
            };
            let Some(job_id) = next else {
                break;
            };

            self.process_job(job_id, &cancel_token, reporter).await;
        }

        reporter.report(WorkerEvent::ShuttingDown);
        reporter.report(WorkerEvent::Stopped);

        Ok(())
    }

    /// Fail jobs a previous process left running and return the queued
    /// ones, oldest first.
    async fn recover<WR: WorkerReporter>(&self, reporter: &WR) -> Result<VecDeque<Uuid>, AppError> {
        let store = self.bus.store();

        let stale = store.list_jobs_with_status(JobStatus::Started).await?;
        for job in &stale {
            let outcome = JobOutcome::Failed(JobError::new(
                ErrorCode::InternalError,
                "Lookup interrupted by a server restart",
            ));
            if let Err(e) = self.bus.record_finished(job.id, &outcome).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to fail interrupted job");
            }
        }

        let queued: VecDeque<Uuid> = store
            .list_jobs_with_status(JobStatus::Queued)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        if !stale.is_empty() || !queued.is_empty() {
            reporter.report(WorkerEvent::Recovered {
                requeued: queued.len(),
                interrupted: stale.len(),
            });
        }
        Ok(queued)
    }

    async fn process_job<WR: WorkerReporter>(
        &self,
        job_id: Uuid,
        cancel_token: &CancellationToken,
        reporter: &WR,
    ) {
        let job = match self.bus.store().get_job(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Queued => job,
            Ok(other) => {
                // Already handled, e.g. both recovered and re-sent.
                reporter.report(WorkerEvent::JobSkipped {
                    job_id,
                    status: other.map(|job| job.status),
                });
                return;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to load job");
                return;
            }
        };

        if let Err(e) = self.bus.record_started(job_id).await {
            tracing::error!(%job_id, error = %e, "Failed to mark job started");
            return;
        }
        reporter.report(WorkerEvent::JobStarted {
            job_id,
            url: &job.hackathon_url,
        });

        let progress = JobProgress::new(self.bus.clone(), job_id);
        let timeout = self.config.job_timeout;
        let run = tokio::time::timeout(timeout, self.pipeline.run(&job.hackathon_url, &progress));

        // Dropping the pipeline future aborts whatever fetch or backoff
        // sleep it is parked on.
        let outcome = tokio::select! {
            result = run => match result {
                Ok(Ok(result)) => JobOutcome::Completed(result),
                Ok(Err(e)) => JobOutcome::Failed(JobError::from(&e)),
                Err(_) => JobOutcome::Failed(JobError::from(&AppError::JobTimeout(timeout))),
            },
            () = cancel_token.cancelled() => JobOutcome::Failed(JobError::new(
                ErrorCode::InternalError,
                "Lookup interrupted by shutdown",
            )),
        };

        match &outcome {
            JobOutcome::Completed(result) => reporter.report(WorkerEvent::JobCompleted {
                job_id,
                winner_count: result.winners.len(),
            }),
            JobOutcome::Failed(error) => reporter.report(WorkerEvent::JobFailed {
                job_id,
                code: error.code,
                error: &error.message,
            }),
        }

        if let Err(e) = self.bus.record_finished(job_id, &outcome).await {
            tracing::error!(%job_id, error = %e, "Failed to record job outcome");
        }
    }
}

/// Running scheduler: a queue handle plus its lifecycle controls.
pub struct SchedulerHandle {
    queue: JobQueue,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), AppError>>,
}

impl SchedulerHandle {
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Cancel the worker and wait for it to exit. A running job is failed
    /// before this returns.
    pub async fn stop(self) -> Result<(), AppError> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| AppError::Internal(format!("Lookup worker panicked: {e}")))?
    }
}
