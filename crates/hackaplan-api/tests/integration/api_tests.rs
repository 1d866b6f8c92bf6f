use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use uuid::Uuid;

use hackaplan_core::config::RateLimitConfig;
use hackaplan_core::rate_limit::RateLimiter;
use hackaplan_core::testutil::wait_for_terminal;

use crate::integration::common::{
    HACKATHON, SALT, json_body, limits, post_lookup, setup_test_app, setup_with_limits,
};

async fn create(app: &crate::integration::common::TestApp, url: &str) -> (StatusCode, Uuid) {
    let response = app.send(post_lookup(url, "198.51.100.7")).await;
    let status = response.status();
    let json = json_body(response).await;
    let id = json["lookup_id"].as_str().unwrap().parse().unwrap();
    (status, id)
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn lookup_is_queued_then_completes() {
    let app = setup_test_app().await;

    let response = app.send(post_lookup("example.devpost.com/", "198.51.100.7")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["status"], "queued");
    let id: Uuid = json["lookup_id"].as_str().unwrap().parse().unwrap();

    wait_for_terminal(&app.db.lookup_repo(), id).await;

    let response = app
        .send(Request::get(format!("/lookups/{id}")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["hackathon_url"], HACKATHON);
    assert!(json["started_at"].is_string());
    assert!(json["finished_at"].is_string());
    assert!(json.get("error").is_none());

    let events = json["progress_events"].as_array().unwrap();
    assert_eq!(events.first().unwrap()["event_type"], "queued");
    assert_eq!(events[1]["event_type"], "started");
    assert_eq!(events.last().unwrap()["event_type"], "completed");
    assert_eq!(events.last().unwrap()["payload"]["winner_count"], 2);

    let winners = json["result"]["winners"].as_array().unwrap();
    let titles: Vec<&str> = winners
        .iter()
        .map(|w| w["project_title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, ["Alpha", "Charlie"]);

    app.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn repeat_request_reuses_the_lookup() {
    let app = setup_test_app().await;

    let (status, first) = create(&app, HACKATHON).await;
    assert_eq!(status, StatusCode::CREATED);
    wait_for_terminal(&app.db.lookup_repo(), first).await;

    let (status, second) = create(&app, "https://EXAMPLE.devpost.com/?ref=home").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);
    assert_eq!(app.site.fetch_count(HACKATHON), 1);
}

#[tokio::test]
async fn invalid_url_returns_400() {
    let app = setup_test_app().await;

    let response = app.send(post_lookup("https://example.com/hack", "198.51.100.7")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_url");
}

#[tokio::test]
async fn rate_limited_caller_gets_429_with_retry_after() {
    let app = setup_with_limits(limits(2)).await;
    let caller = "203.0.113.5";

    for _ in 0..2 {
        let response = app.send(post_lookup(HACKATHON, caller)).await;
        assert!(response.status().is_success());
    }

    let response = app.send(post_lookup(HACKATHON, caller)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let header_secs: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(header_secs > 0 && header_secs <= 3600);
    let json = json_body(response).await;
    assert_eq!(json["error"], "rate_limited");
    assert_eq!(json["retry_after"], header_secs);

    // A different caller is unaffected.
    let response = app.send(post_lookup(HACKATHON, "203.0.113.6")).await;
    assert!(response.status().is_success());

    let identity = RateLimiter::fingerprint(caller, SALT);
    let recorded = app
        .db
        .rate_limit_repo()
        .count_since(&identity, chrono::Utc::now() - chrono::TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(recorded, 2);
}

#[tokio::test]
async fn untrusted_forwarded_header_does_not_split_budgets() {
    let app = setup_with_limits(RateLimitConfig {
        trust_forwarded_for: false,
        ..limits(1)
    })
    .await;

    let response = app.send(post_lookup(HACKATHON, "203.0.113.5")).await;
    assert!(response.status().is_success());

    // Same peer, different claimed address.
    let response = app.send(post_lookup(HACKATHON, "203.0.113.6")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unknown_lookup_returns_404() {
    let app = setup_test_app().await;

    for path in [
        format!("/lookups/{}", Uuid::new_v4()),
        "/lookups/not-a-uuid".to_string(),
        format!("/lookups/{}/ws", Uuid::new_v4()),
    ] {
        let response = app.send(Request::get(&path).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        let json = json_body(response).await;
        assert_eq!(json["error"], "job_not_found");
    }
}

#[tokio::test]
async fn progress_socket_requires_an_upgrade() {
    let app = setup_test_app().await;
    let (_, id) = create(&app, HACKATHON).await;

    let response = app
        .send(Request::get(format!("/lookups/{id}/ws")).body(Body::empty()).unwrap())
        .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn search_returns_ranked_suggestions() {
    let app = setup_test_app().await;

    let response = app
        .send(
            Request::get("/hackathons/search?query=%20example%20hack&limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["query"], "example hack");

    let suggestions = json["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0]["hackathon_url"], "https://example-2025.devpost.com");
    assert_eq!(suggestions[0]["organization_name"], "Example Org");
    assert_eq!(suggestions[1]["hackathon_url"], "https://example-2024.devpost.com");
    assert_eq!(suggestions[1]["thumbnail_url"], "https://cdn.devpost.test/e24.png");
}

#[tokio::test]
async fn short_search_query_returns_nothing() {
    let app = setup_test_app().await;

    let response = app
        .send(Request::get("/hackathons/search?query=e").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["suggestions"], serde_json::json!([]));
}
