use std::time::Duration;

use hackaplan_client::DevpostExtractor;
use hackaplan_core::ErrorCode;
use hackaplan_core::events::EventPayload;
use hackaplan_core::pipeline::{FALLBACK_SOURCE, PipelineConfig, ScrapePipeline};
use hackaplan_core::retry::RetryPolicy;
use hackaplan_core::testutil::RecordingSink;

use crate::integration::common::{
    FixtureFetcher, HACKATHON, gallery_html, gallery_item, listing_html, project_html,
    software_url,
};

fn config() -> PipelineConfig {
    PipelineConfig {
        listing_policy: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_secs(1)),
        detail_policy: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_secs(1)),
        max_gallery_pages: 40,
        detail_concurrency: 4,
    }
}

fn pipeline(fetcher: &FixtureFetcher) -> ScrapePipeline<FixtureFetcher, DevpostExtractor> {
    ScrapePipeline::new(fetcher.clone(), DevpostExtractor::new(), config())
}

/// Two gallery pages, ten projects, four badged winners. One winner's
/// detail page is missing.
fn two_page_hackathon() -> FixtureFetcher {
    let gallery = format!("{HACKATHON}/project-gallery");
    let page_one = [
        gallery_item("alpha", "Alpha", true),
        gallery_item("bravo", "Bravo", false),
        gallery_item("charlie", "Charlie", false),
        gallery_item("delta", "Delta", true),
        gallery_item("echo", "Echo", false),
    ];
    let page_two = [
        gallery_item("foxtrot", "Foxtrot", false),
        gallery_item("golf", "Golf", true),
        gallery_item("hotel", "Hotel", false),
        gallery_item("india", "India", false),
        gallery_item("juliet", "Juliet", true),
    ];

    FixtureFetcher::new([
        (HACKATHON.to_string(), listing_html("Example Hack")),
        (gallery.clone(), gallery_html(&page_one, Some("?page=2"))),
        (format!("{gallery}?page=2"), gallery_html(&page_two, None)),
        (software_url("alpha"), project_html("Alpha", Some("Grand Prize"))),
        (software_url("delta"), project_html("Delta", None)),
        (software_url("golf"), project_html("Golf", Some("Best Design"))),
    ])
}

#[tokio::test]
async fn real_markup_end_to_end() {
    let fetcher = two_page_hackathon();
    let sink = RecordingSink::new();

    let result = pipeline(&fetcher)
        .run("example.devpost.com/", &sink)
        .await
        .unwrap();

    assert_eq!(result.hackathon.name, "Example Hack");
    assert_eq!(result.hackathon.url, HACKATHON);
    assert_eq!(result.hackathon.scanned_pages, 2);
    assert_eq!(result.hackathon.scanned_projects, 10);
    assert_eq!(result.hackathon.winner_count, 4);

    let titles: Vec<&str> = result.winners.iter().map(|w| w.project_title.as_str()).collect();
    assert_eq!(titles, vec!["Alpha", "Delta", "Golf", "Juliet"]);

    let alpha = &result.winners[0];
    assert_eq!(alpha.prizes[0].prize_name, "Grand Prize");
    assert_eq!(alpha.tagline.as_deref(), Some("Alpha tagline"));
    assert_eq!(alpha.built_with[0].name, "rust");
    assert_eq!(alpha.description_sections[0].heading, "What it does");

    // No prize block for this hackathon: the badge still counts.
    assert_eq!(result.winners[1].prizes[0].prize_name, "Winner");

    let juliet = &result.winners[3];
    let warning = juliet.warning.as_ref().unwrap();
    assert_eq!(warning.code, ErrorCode::FetchError);
    assert_eq!(
        juliet.preview_image_url.as_deref(),
        Some("https://cdn.devpost.test/juliet.png")
    );

    let found = sink
        .event_types()
        .iter()
        .filter(|t| *t == "winner_project_found")
        .count();
    assert_eq!(found, 4);

    // Non-winner detail pages are never requested.
    assert!(!fetcher.requested().contains(&software_url("bravo")));
}

#[tokio::test]
async fn missing_badges_fall_back_to_prize_confirmation() {
    let gallery = format!("{HACKATHON}/project-gallery");
    let items = [
        gallery_item("alpha", "Alpha", false),
        gallery_item("bravo", "Bravo", false),
        gallery_item("charlie", "Charlie", false),
    ];
    let fetcher = FixtureFetcher::new([
        (HACKATHON.to_string(), listing_html("Example Hack")),
        (gallery, gallery_html(&items, None)),
        (software_url("alpha"), project_html("Alpha", None)),
        (software_url("bravo"), project_html("Bravo", Some("Runner Up"))),
    ]);
    let sink = RecordingSink::new();

    let result = pipeline(&fetcher).run(HACKATHON, &sink).await.unwrap();

    assert_eq!(result.winners.len(), 1);
    assert_eq!(result.winners[0].project_title, "Bravo");

    let payloads = sink.payloads();
    assert!(payloads.iter().any(|p| matches!(
        p,
        EventPayload::WinnerDetectionFallback { candidate_projects: 3, .. }
    )));
    assert!(payloads.iter().any(|p| matches!(
        p,
        EventPayload::WinnerProjectFound { source: Some(s), .. } if s == FALLBACK_SOURCE
    )));
    assert!(payloads.iter().any(|p| matches!(
        p,
        EventPayload::ProjectSkipped { project_url, .. } if *project_url == software_url("charlie")
    )));
}

#[tokio::test]
async fn missing_listing_fails_the_lookup() {
    let fetcher = FixtureFetcher::default();
    let err = pipeline(&fetcher)
        .run(HACKATHON, &RecordingSink::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FetchError);
}
