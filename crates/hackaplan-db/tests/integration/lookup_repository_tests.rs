use hackaplan_core::error::{AppError, ErrorCode};
use hackaplan_core::events::{EventPayload, Stage};
use hackaplan_core::job::{JobOutcome, JobStatus};
use hackaplan_core::testutil::{failed, sample_result};
use hackaplan_core::traits::LookupStore;
use hackaplan_db::{Database, DatabaseConfig};
use uuid::Uuid;

use crate::integration::common::{Clock, queued_job, setup_test_db, started_job};

const URL: &str = "https://example.devpost.com";

fn stage(stage: Stage) -> EventPayload {
    EventPayload::StageStarted { stage }
}

#[tokio::test]
async fn insert_job_and_read_back() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();

    let job = queued_job(&repo, URL, &mut clock).await;

    let stored = repo.get_job(job.id).await.unwrap().expect("job exists");
    assert_eq!(stored, job);
    assert_eq!(stored.status, JobStatus::Queued);
    assert!(stored.started_at.is_none());

    let events = repo.list_events(job.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].event_type(), "queued");
}

#[tokio::test]
async fn unknown_job_reads_as_none() {
    let repo = setup_test_db().await.lookup_repo();
    let id = Uuid::new_v4();
    assert!(repo.get_job(id).await.unwrap().is_none());
    assert!(repo.list_events(id).await.unwrap().is_empty());
    assert!(repo.get_result(id).await.unwrap().is_none());
}

#[tokio::test]
async fn events_get_per_job_sequence_numbers() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let a = started_job(&repo, URL, &mut clock).await;
    let b = started_job(&repo, "https://other.devpost.com", &mut clock).await;

    for s in [Stage::ValidateUrl, Stage::FetchListingPage] {
        repo.append_event(a.id, clock.tick(), &stage(s)).await.unwrap();
    }
    let only_b = repo.append_event(b.id, clock.tick(), &stage(Stage::ValidateUrl)).await.unwrap();
    assert_eq!(only_b.seq, 3);

    let seqs: Vec<u64> = repo.list_events(a.id).await.unwrap().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);

    let tail = repo.list_events_after(a.id, 2).await.unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].payload, stage(Stage::ValidateUrl));
}

#[tokio::test]
async fn completion_writes_result_and_terminal_event_together() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let job = started_job(&repo, URL, &mut clock).await;
    let result = sample_result(2);

    let finished_at = clock.tick();
    let payload = EventPayload::Completed {
        lookup_id: job.id,
        winner_count: 2,
    };
    let event = repo
        .mark_finished(job.id, &JobOutcome::Completed(result.clone()), finished_at, &payload)
        .await
        .unwrap();
    assert_eq!(event.seq, 3);

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.finished_at, Some(finished_at));
    assert!(stored.error.is_none());
    assert_eq!(repo.get_result(job.id).await.unwrap(), Some(result));

    let events = repo.list_events(job.id).await.unwrap();
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn failure_records_code_and_message() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let job = started_job(&repo, URL, &mut clock).await;

    let outcome = failed(ErrorCode::Timeout, "Lookup exceeded the 300s time limit");
    let payload = EventPayload::Failed {
        code: ErrorCode::Timeout,
        message: "Lookup exceeded the 300s time limit".into(),
    };
    repo.mark_finished(job.id, &outcome, clock.tick(), &payload).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let error = stored.error.unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert!(error.message.contains("300s"));
    assert!(repo.get_result(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn transitions_are_guarded() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let job = queued_job(&repo, URL, &mut clock).await;

    // queued -> completed skips started.
    let payload = EventPayload::Completed {
        lookup_id: job.id,
        winner_count: 0,
    };
    let err = repo
        .mark_finished(job.id, &JobOutcome::Completed(sample_result(0)), clock.tick(), &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert_eq!(repo.list_events(job.id).await.unwrap().len(), 1);

    repo.mark_started(job.id, clock.tick(), &EventPayload::Started { lookup_id: job.id })
        .await
        .unwrap();
    let err = repo
        .mark_started(job.id, clock.tick(), &EventPayload::Started { lookup_id: job.id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let outcome = failed(ErrorCode::FetchError, "HTTP 503");
    let failed_event = EventPayload::Failed {
        code: ErrorCode::FetchError,
        message: "HTTP 503".into(),
    };
    repo.mark_finished(job.id, &outcome, clock.tick(), &failed_event).await.unwrap();

    let err = repo
        .append_event(job.id, clock.tick(), &stage(Stage::AssembleResult))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
    let err = repo
        .mark_finished(job.id, &outcome, clock.tick(), &failed_event)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let events = repo.list_events(job.id).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn missing_job_is_not_found() {
    let repo = setup_test_db().await.lookup_repo();
    let id = Uuid::new_v4();
    let err = repo
        .mark_started(id, hackaplan_core::util::now(), &EventPayload::Started { lookup_id: id })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::JobNotFound(_)));
}

#[tokio::test]
async fn active_and_recent_lookups_are_found_by_url() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();

    let done = started_job(&repo, URL, &mut clock).await;
    let finished_at = clock.tick();
    repo.mark_finished(
        done.id,
        &JobOutcome::Completed(sample_result(1)),
        finished_at,
        &EventPayload::Completed {
            lookup_id: done.id,
            winner_count: 1,
        },
    )
    .await
    .unwrap();

    assert!(repo.find_active_job(URL).await.unwrap().is_none());
    let recent = repo.find_completed_since(URL, finished_at).await.unwrap().unwrap();
    assert_eq!(recent.id, done.id);
    assert!(repo.find_completed_since(URL, clock.tick()).await.unwrap().is_none());

    let active = queued_job(&repo, URL, &mut clock).await;
    assert_eq!(repo.find_active_job(URL).await.unwrap().unwrap().id, active.id);
    assert!(repo.find_active_job("https://other.devpost.com").await.unwrap().is_none());
}

#[tokio::test]
async fn jobs_by_status_oldest_first() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let first = queued_job(&repo, "https://a.devpost.com", &mut clock).await;
    let running = started_job(&repo, "https://b.devpost.com", &mut clock).await;
    let second = queued_job(&repo, "https://c.devpost.com", &mut clock).await;

    let queued: Vec<Uuid> = repo
        .list_jobs_with_status(JobStatus::Queued)
        .await
        .unwrap()
        .iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(queued, vec![first.id, second.id]);

    let started = repo.list_jobs_with_status(JobStatus::Started).await.unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, running.id);
}

#[tokio::test]
async fn file_database_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("nested/hackaplan.db").display()),
        max_connections: 2,
    };
    let mut clock = Clock::new();

    let job_id = {
        let db = Database::connect(&config).await.unwrap();
        db.migrate().await.unwrap();
        let repo = db.lookup_repo();
        repo.health_check().await.unwrap();
        let job = queued_job(&repo, URL, &mut clock).await;
        db.pool().close().await;
        job.id
    };

    let db = Database::connect(&config).await.unwrap();
    db.migrate().await.unwrap();
    let job = db.lookup_repo().get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.hackathon_url, URL);
    assert_eq!(job.status, JobStatus::Queued);
}
