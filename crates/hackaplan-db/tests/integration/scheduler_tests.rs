use std::time::Duration;

use hackaplan_core::job::{JobStatus, WorkerConfig};
use hackaplan_core::pipeline::{PipelineConfig, ScrapePipeline};
use hackaplan_core::progress::ProgressBus;
use hackaplan_core::retry::RetryPolicy;
use hackaplan_core::testutil::{FakeEntry, FakeSite, MockReporter, wait_for_terminal};
use hackaplan_core::traits::LookupStore;
use hackaplan_core::worker::LookupScheduler;
use hackaplan_db::LookupRepository;

use crate::integration::common::{Clock, queued_job, setup_test_db, started_job};

const URL: &str = "https://example.devpost.com";

fn scheduler(
    repo: &LookupRepository,
    site: &FakeSite,
) -> (
    ProgressBus<LookupRepository>,
    LookupScheduler<LookupRepository, FakeSite, FakeSite>,
) {
    let bus = ProgressBus::new(repo.clone());
    let config = PipelineConfig {
        listing_policy: RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(5)),
        detail_policy: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_secs(5)),
        max_gallery_pages: 10,
        detail_concurrency: 2,
    };
    let pipeline = ScrapePipeline::new(site.clone(), site.clone(), config);
    let scheduler = LookupScheduler::new(bus.clone(), pipeline, WorkerConfig::default());
    (bus, scheduler)
}

fn site() -> FakeSite {
    FakeSite::new().with_hackathon(
        URL,
        "Example Hack",
        vec![
            vec![FakeEntry::winner("Alpha"), FakeEntry::plain("Bravo")],
            vec![FakeEntry::winner("Charlie")],
        ],
    )
}

#[tokio::test]
async fn lookup_runs_to_completion_on_sqlite() {
    let repo = setup_test_db().await.lookup_repo();
    let (bus, scheduler) = scheduler(&repo, &site());
    let handle = scheduler.start(MockReporter::new());

    let job = handle.queue().submit(&bus, "example.devpost.com/").await.unwrap();
    let finished = wait_for_terminal(&repo, job.id).await;
    handle.stop().await.unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    let result = repo.get_result(job.id).await.unwrap().unwrap();
    assert_eq!(result.hackathon.winner_count, 2);
    assert_eq!(result.winners[0].project_title, "Alpha");

    let events = repo.list_events(job.id).await.unwrap();
    assert_eq!(events.first().unwrap().event_type(), "queued");
    assert_eq!(events[1].event_type(), "started");
    assert_eq!(events.last().unwrap().event_type(), "completed");
    for pair in events.windows(2) {
        assert_eq!(pair[0].seq + 1, pair[1].seq);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn subscriber_sees_the_same_log_as_a_poll() {
    let repo = setup_test_db().await.lookup_repo();
    let (bus, scheduler) = scheduler(&repo, &site());
    let handle = scheduler.start(MockReporter::new());

    let job = handle.queue().submit(&bus, URL).await.unwrap();
    let mut subscription = bus.subscribe(job.id).await.unwrap();
    let mut pushed = Vec::new();
    while let Some(event) = subscription.next().await.unwrap() {
        pushed.push(event);
    }
    handle.stop().await.unwrap();

    let polled = repo.list_events(job.id).await.unwrap();
    assert_eq!(pushed, polled);
}

#[tokio::test]
async fn restart_fails_interrupted_and_resumes_queued() {
    let repo = setup_test_db().await.lookup_repo();
    let mut clock = Clock::new();
    let interrupted = started_job(&repo, "https://gone.devpost.com", &mut clock).await;
    let waiting = queued_job(&repo, URL, &mut clock).await;

    let (_bus, scheduler) = scheduler(&repo, &site());
    let handle = scheduler.start(MockReporter::new());

    let resumed = wait_for_terminal(&repo, waiting.id).await;
    handle.stop().await.unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    let failed = repo.get_job(interrupted.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.unwrap().code,
        hackaplan_core::ErrorCode::InternalError
    );
}
