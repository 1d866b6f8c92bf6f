//! Per-job progress log with a poll path and a push path.
//!
//! The store is the single source of truth. Every event is persisted
//! first and only then broadcast to live subscribers, and both steps run
//! under the job's channel lock. A subscriber registers its receiver under
//! that same lock before reading the backlog, so the backlog plus the live
//! feed always cover the full log. Sequence numbers let a subscriber spot a
//! gap (lagged receiver, or an event persisted whose broadcast was cut off)
//! and fill it from the store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{EventPayload, ProgressEvent};
use crate::job::{JobOutcome, LookupJob};
use crate::traits::{LookupStore, ProgressSink};

const CHANNEL_CAPACITY: usize = 256;

struct JobChannel {
    sender: broadcast::Sender<ProgressEvent>,
    clock: tokio::sync::Mutex<ChannelClock>,
}

/// Keeps timestamps strictly increasing within one job, one microsecond
/// apart at minimum, so `(timestamp, event_type, payload)` stays unique.
#[derive(Default)]
struct ChannelClock {
    last: Option<DateTime<Utc>>,
    seeded: bool,
}

impl ChannelClock {
    fn stamp(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let ts = match self.last {
            Some(last) if last >= candidate => last + chrono::TimeDelta::microseconds(1),
            _ => candidate,
        };
        self.last = Some(ts);
        ts
    }
}

struct BusInner<S> {
    store: S,
    channels: Mutex<HashMap<Uuid, Arc<JobChannel>>>,
}

/// Ordered, append-only event log per job, fanned out to live subscribers.
pub struct ProgressBus<S> {
    inner: Arc<BusInner<S>>,
}

impl<S> Clone for ProgressBus<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LookupStore> ProgressBus<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(BusInner {
                store,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Persist a new job and its `queued` event.
    pub async fn record_queued(&self, job: &LookupJob) -> Result<ProgressEvent, AppError> {
        let channel = self.channel(job.id);
        let mut clock = channel.clock.lock().await;
        clock.seeded = true;
        let ts = clock.stamp(job.created_at);
        let payload = EventPayload::Queued {
            lookup_id: job.id,
            hackathon_url: job.hackathon_url.clone(),
        };
        let event = self.inner.store.insert_job(job, ts, &payload).await?;
        let _ = channel.sender.send(event.clone());
        Ok(event)
    }

    /// Mark the job started and append its `started` event.
    pub async fn record_started(&self, job_id: Uuid) -> Result<ProgressEvent, AppError> {
        let channel = self.channel(job_id);
        let mut clock = channel.clock.lock().await;
        let ts = self.next_timestamp(job_id, &mut clock).await?;
        let payload = EventPayload::Started { lookup_id: job_id };
        let event = self.inner.store.mark_started(job_id, ts, &payload).await?;
        let _ = channel.sender.send(event.clone());
        Ok(event)
    }

    /// Append a pipeline event to an active job.
    pub async fn publish(
        &self,
        job_id: Uuid,
        payload: EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let channel = self.channel(job_id);
        let mut clock = channel.clock.lock().await;
        let ts = self.next_timestamp(job_id, &mut clock).await?;
        match self.inner.store.append_event(job_id, ts, &payload).await {
            Ok(event) => {
                let _ = channel.sender.send(event.clone());
                Ok(event)
            }
            Err(err) => {
                if matches!(err, AppError::InvalidTransition(_)) {
                    drop(clock);
                    self.release(job_id, &channel);
                }
                Err(err)
            }
        }
    }

    /// Commit the job's terminal state together with its mirrored
    /// `completed`/`failed` event, then close the live channel.
    pub async fn record_finished(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
    ) -> Result<ProgressEvent, AppError> {
        let channel = self.channel(job_id);
        let event = {
            let mut clock = channel.clock.lock().await;
            let ts = self.next_timestamp(job_id, &mut clock).await?;
            let payload = match outcome {
                JobOutcome::Completed(result) => EventPayload::Completed {
                    lookup_id: job_id,
                    winner_count: result.winners.len() as u32,
                },
                JobOutcome::Failed(error) => EventPayload::Failed {
                    code: error.code,
                    message: error.message.clone(),
                },
            };
            let event = self
                .inner
                .store
                .mark_finished(job_id, outcome, ts, &payload)
                .await?;
            let _ = channel.sender.send(event.clone());
            event
        };
        self.release(job_id, &channel);
        Ok(event)
    }

    /// Register a live subscriber. The returned subscription yields the full
    /// backlog first, then live events, and ends after the terminal event.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<Subscription<S>, AppError> {
        if self.inner.store.get_job(job_id).await?.is_none() {
            return Err(AppError::JobNotFound(job_id.to_string()));
        }

        let channel = self.channel(job_id);
        let (receiver, backlog) = {
            let _clock = channel.clock.lock().await;
            let receiver = channel.sender.subscribe();
            let backlog = self.inner.store.list_events(job_id).await?;
            (receiver, backlog)
        };

        let finished = backlog.last().is_some_and(ProgressEvent::is_terminal);
        if finished {
            self.release(job_id, &channel);
        }

        Ok(Subscription {
            job_id,
            store: self.inner.store.clone(),
            pending: backlog.into(),
            receiver: (!finished).then_some(receiver),
            last_seq: 0,
            done: false,
        })
    }

    /// Number of jobs with an open live channel.
    pub fn open_channels(&self) -> usize {
        self.lock_channels().len()
    }

    fn channel(&self, job_id: Uuid) -> Arc<JobChannel> {
        let mut channels = self.lock_channels();
        Arc::clone(channels.entry(job_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            Arc::new(JobChannel {
                sender,
                clock: tokio::sync::Mutex::new(ChannelClock::default()),
            })
        }))
    }

    fn release(&self, job_id: Uuid, channel: &Arc<JobChannel>) {
        let mut channels = self.lock_channels();
        if channels
            .get(&job_id)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(&job_id);
        }
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<JobChannel>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn next_timestamp(
        &self,
        job_id: Uuid,
        clock: &mut ChannelClock,
    ) -> Result<DateTime<Utc>, AppError> {
        if !clock.seeded {
            // Channel created after the job already had events (restart,
            // late subscriber): continue from the last stored timestamp.
            if let Some(last) = self.inner.store.list_events(job_id).await?.last() {
                clock.stamp(last.timestamp);
            }
            clock.seeded = true;
        }
        Ok(clock.stamp(crate::util::now()))
    }
}

/// Live view of one job's log.
pub struct Subscription<S> {
    job_id: Uuid,
    store: S,
    pending: VecDeque<ProgressEvent>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    last_seq: u64,
    done: bool,
}

impl<S: LookupStore> Subscription<S> {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event in append order, or `None` once the terminal event has
    /// been delivered.
    ///
    /// Cancel safe: dropping the future before it resolves loses no event.
    pub async fn next(&mut self) -> Result<Option<ProgressEvent>, AppError> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(event) = self.pending.pop_front() {
                if let Some(event) = self.accept(event) {
                    return Ok(Some(event));
                }
                continue;
            }

            let Some(receiver) = self.receiver.as_mut() else {
                self.done = true;
                return Ok(None);
            };

            match receiver.recv().await {
                Ok(event) if event.seq > self.last_seq + 1 => {
                    // Something was persisted without reaching us; the
                    // store has it, and this event too.
                    self.refill().await?;
                }
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Ok(Some(event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = %self.job_id, skipped, "Subscriber lagged, resyncing");
                    self.refill().await?;
                }
                Err(RecvError::Closed) => {
                    // The receiver goes only once the store has been read,
                    // so a cancelled refill is simply retried.
                    self.refill().await?;
                    self.receiver = None;
                }
            }
        }
    }

    fn accept(&mut self, event: ProgressEvent) -> Option<ProgressEvent> {
        if event.seq <= self.last_seq {
            return None;
        }
        self.last_seq = event.seq;
        if event.is_terminal() {
            self.done = true;
        }
        Some(event)
    }

    async fn refill(&mut self) -> Result<(), AppError> {
        let missed = self
            .store
            .list_events_after(self.job_id, self.last_seq)
            .await?;
        self.pending.extend(missed);
        Ok(())
    }
}

/// [`ProgressSink`] that publishes into the bus for one job.
pub struct JobProgress<S> {
    bus: ProgressBus<S>,
    job_id: Uuid,
}

impl<S: LookupStore> JobProgress<S> {
    pub fn new(bus: ProgressBus<S>, job_id: Uuid) -> Self {
        Self { bus, job_id }
    }
}

impl<S: LookupStore> ProgressSink for JobProgress<S> {
    async fn emit(&self, payload: EventPayload) -> Result<(), AppError> {
        self.bus.publish(self.job_id, payload).await.map(|_| ())
    }
}

/// Sink that only logs, for pipeline runs outside the scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    async fn emit(&self, payload: EventPayload) -> Result<(), AppError> {
        match &payload {
            EventPayload::StageStarted { stage } => tracing::info!(%stage, "Stage started"),
            EventPayload::GalleryPageScanned {
                page_number,
                scanned_projects,
                winners_found_on_page,
                ..
            } => tracing::info!(
                page_number,
                scanned_projects,
                winners_found_on_page,
                "Gallery page scanned"
            ),
            EventPayload::WinnerProjectScraped {
                index,
                total,
                project_title,
                warning,
                ..
            } => tracing::info!(
                index,
                total,
                %project_title,
                partial = warning.is_some(),
                "Winner scraped"
            ),
            other => tracing::debug!(event_type = other.event_type(), "Progress"),
        }
        Ok(())
    }
}
