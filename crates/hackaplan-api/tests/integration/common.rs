use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::get;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

use hackaplan_api::routes;
use hackaplan_api::state::AppState;
use hackaplan_client::{HackathonSearchClient, ReqwestFetcher};
use hackaplan_core::config::RateLimitConfig;
use hackaplan_core::job::WorkerConfig;
use hackaplan_core::pipeline::{PipelineConfig, ScrapePipeline};
use hackaplan_core::progress::ProgressBus;
use hackaplan_core::retry::RetryPolicy;
use hackaplan_core::testutil::{FakeEntry, FakeSite, MockReporter};
use hackaplan_core::worker::{LookupScheduler, SchedulerHandle};
use hackaplan_db::Database;

pub const HACKATHON: &str = "https://example.devpost.com";
pub const SALT: &str = "test-salt";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub site: FakeSite,
    pub scheduler: SchedulerHandle,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Serve the router on a loopback port, for clients that need a real
    /// connection.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

pub fn site() -> FakeSite {
    FakeSite::new().with_hackathon(
        HACKATHON,
        "Example Hack",
        vec![vec![
            FakeEntry::winner("Alpha"),
            FakeEntry::plain("Bravo"),
            FakeEntry::winner("Charlie"),
        ]],
    )
}

/// Canned search API answer, whatever the query.
fn search_payload() -> serde_json::Value {
    serde_json::json!({
        "hackathons": [
            {"title": "Example Hack 2024", "url": "https://example-2024.devpost.com",
             "thumbnail_url": "//cdn.devpost.test/e24.png", "winners_announced": true},
            {"title": "Example Hack 2025", "url": "https://example-2025.devpost.com/",
             "organization_name": "Example Org"},
            {"title": "Unrelated Jam", "url": "https://unrelated.devpost.com"}
        ]
    })
}

/// Serve the search stub on a loopback port and return its API URL.
async fn spawn_search_stub() -> String {
    let stub = Router::new().route(
        "/api/hackathons",
        get(|| async { axum::Json(search_payload()) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, stub).await.unwrap();
    });
    format!("http://{addr}/api/hackathons")
}

pub async fn setup_test_app() -> TestApp {
    setup_with_limits(RateLimitConfig::default()).await
}

pub async fn setup_with_limits(rate_limit: RateLimitConfig) -> TestApp {
    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();

    let site = site();
    let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(5));
    let pipeline = ScrapePipeline::new(
        site.clone(),
        site.clone(),
        PipelineConfig {
            listing_policy: policy.clone(),
            detail_policy: policy.clone(),
            max_gallery_pages: 10,
            detail_concurrency: 2,
        },
    );
    let bus = ProgressBus::new(db.lookup_repo());
    let scheduler = LookupScheduler::new(bus.clone(), pipeline, WorkerConfig::default())
        .start(MockReporter::new());

    let search_fetcher = ReqwestFetcher::new("hackaplan-tests").unwrap().allow_private_urls();
    let search = HackathonSearchClient::new(search_fetcher, policy)
        .with_api_url(spawn_search_stub().await);

    let state = Arc::new(AppState {
        db: db.clone(),
        bus,
        queue: scheduler.queue(),
        limiter: rate_limit.build_limiter(),
        ip_hash_salt: rate_limit.ip_hash_salt.clone(),
        trust_forwarded_for: rate_limit.trust_forwarded_for,
        reuse_ttl: Duration::from_secs(1800),
        search,
    });

    TestApp {
        router: routes::router(state),
        db,
        site,
        scheduler,
    }
}

pub fn limits(hourly_limit: u32) -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        hourly_limit,
        daily_limit: 10,
        ip_hash_salt: SALT.into(),
        trust_forwarded_for: true,
    }
}

pub fn post_lookup(url: &str, ip: &str) -> Request<Body> {
    Request::post("/lookups")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(
            serde_json::json!({ "hackathon_url": url }).to_string(),
        ))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
