use chrono::{DateTime, TimeDelta, Utc};
use hackaplan_core::events::EventPayload;
use hackaplan_core::job::LookupJob;
use hackaplan_core::traits::LookupStore;
use hackaplan_core::util::now;
use hackaplan_db::{Database, LookupRepository};

/// Fresh, migrated in-memory database.
pub async fn setup_test_db() -> Database {
    let db = Database::connect_in_memory()
        .await
        .expect("Failed to open in-memory database");
    db.migrate().await.expect("Failed to run migrations");
    db
}

/// Strictly increasing timestamps for one test.
pub struct Clock {
    base: DateTime<Utc>,
    ticks: i64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            base: now(),
            ticks: 0,
        }
    }

    pub fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        self.base + TimeDelta::milliseconds(self.ticks)
    }
}

/// Insert a queued job for `url` with its `queued` event.
pub async fn queued_job(repo: &LookupRepository, url: &str, clock: &mut Clock) -> LookupJob {
    let mut job = LookupJob::new(url);
    job.created_at = clock.tick();
    let payload = EventPayload::Queued {
        lookup_id: job.id,
        hackathon_url: job.hackathon_url.clone(),
    };
    repo.insert_job(&job, job.created_at, &payload)
        .await
        .expect("Failed to insert job");
    job
}

/// Insert a job and move it to `started`.
pub async fn started_job(repo: &LookupRepository, url: &str, clock: &mut Clock) -> LookupJob {
    let job = queued_job(repo, url, clock).await;
    repo.mark_started(job.id, clock.tick(), &EventPayload::Started { lookup_id: job.id })
        .await
        .expect("Failed to start job");
    job
}
