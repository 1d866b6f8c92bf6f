use std::collections::{HashMap, HashSet};
use std::pin::pin;

use futures::StreamExt;

use crate::error::AppError;
use crate::events::{EventPayload, Stage};
use crate::models::{
    GalleryEntry, HackathonMetadata, ItemWarning, ListingPage, LookupResult, PrizeAward,
    WinnerProject,
};
use crate::retry::{RetryPolicy, RetryingFetcher};
use crate::traits::{Extractor, Fetcher, ProgressSink};
use crate::urls::normalize_hackathon_url;

pub const FALLBACK_SOURCE: &str = "project_page_prize_confirmation";

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Policy for the listing page and every gallery page.
    pub listing_policy: RetryPolicy,
    /// Policy for each winner's detail page.
    pub detail_policy: RetryPolicy,
    pub max_gallery_pages: u32,
    /// Detail pages fetched at once.
    pub detail_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listing_policy: RetryPolicy::default(),
            detail_policy: RetryPolicy::new(
                2,
                std::time::Duration::from_millis(250),
                std::time::Duration::from_secs(8),
            ),
            max_gallery_pages: 40,
            detail_concurrency: 6,
        }
    }
}

/// The entries of a gallery crawl plus its counters.
#[derive(Debug, Default)]
struct GalleryCrawl {
    entries: Vec<GalleryEntry>,
    scanned_pages: u32,
    scanned_projects: u32,
    truncated: bool,
}

/// How detail results are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailMode {
    /// Entries carry a winner badge; keep them even without prize labels.
    Badged,
    /// No badges anywhere; keep only entries whose page lists a prize.
    PrizeConfirmation,
}

/// Winner predicate over a gallery entry.
pub fn is_winner(entry: &GalleryEntry) -> bool {
    entry.is_winner
}

/// Collapse entries sharing a project URL. The first occurrence keeps its
/// position; the data of the last one wins.
pub fn collapse_duplicates<'a>(entries: impl IntoIterator<Item = &'a GalleryEntry>) -> Vec<GalleryEntry> {
    let mut unique: Vec<GalleryEntry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        match positions.get(&entry.project_url) {
            Some(&index) => unique[index] = entry.clone(),
            None => {
                positions.insert(entry.project_url.clone(), unique.len());
                unique.push(entry.clone());
            }
        }
    }
    unique
}

/// Runs one lookup: validate, fetch listing, crawl gallery, filter
/// winners, scrape their pages, assemble.
///
/// Generic over the fetcher and extractor so tests can drive it with
/// fixture pages and no network.
pub struct ScrapePipeline<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    fetcher: RetryingFetcher<F>,
    extractor: E,
    config: PipelineConfig,
}

impl<F, E> ScrapePipeline<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    pub fn new(fetcher: F, extractor: E, config: PipelineConfig) -> Self {
        Self {
            fetcher: RetryingFetcher::new(fetcher),
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run<P: ProgressSink>(
        &self,
        hackathon_url: &str,
        progress: &P,
    ) -> Result<LookupResult, AppError> {
        progress.emit(started(Stage::ValidateUrl)).await?;
        let hackathon_url = normalize_hackathon_url(hackathon_url)?;
        progress.emit(completed(Stage::ValidateUrl)).await?;

        progress.emit(started(Stage::FetchListingPage)).await?;
        let html = self
            .fetcher
            .fetch_with(&hackathon_url, &self.config.listing_policy)
            .await?;
        let listing = self.extractor.parse_listing(&hackathon_url, &html)?;
        tracing::info!(
            url = %hackathon_url,
            name = %listing.name,
            winners_announced = listing.winners_announced,
            "Listing page parsed"
        );
        progress.emit(completed(Stage::FetchListingPage)).await?;

        let crawl = self.crawl_gallery(&listing.gallery_url, progress).await?;

        progress.emit(started(Stage::FilterWinners)).await?;
        let badged = collapse_duplicates(crawl.entries.iter().filter(|e| is_winner(e)));
        let (targets, mode) = if !badged.is_empty() {
            (badged, DetailMode::Badged)
        } else if listing.winners_announced {
            let candidates = collapse_duplicates(&crawl.entries);
            progress
                .emit(EventPayload::WinnerDetectionFallback {
                    reason: "gallery_badges_missing".into(),
                    candidate_projects: candidates.len() as u32,
                })
                .await?;
            (candidates, DetailMode::PrizeConfirmation)
        } else {
            progress
                .emit(EventPayload::WinnersNotAnnounced {
                    message: "Hackathon page indicates winners are not announced yet.".into(),
                })
                .await?;
            (Vec::new(), DetailMode::Badged)
        };
        progress.emit(completed(Stage::FilterWinners)).await?;

        progress.emit(started(Stage::ScrapeWinnerDetail)).await?;
        let winners = self
            .scrape_details(&hackathon_url, &listing, targets, mode, progress)
            .await?;
        progress.emit(completed(Stage::ScrapeWinnerDetail)).await?;

        progress.emit(started(Stage::AssembleResult)).await?;
        if crawl.scanned_pages == 0 {
            return Err(AppError::ParseError(
                "Unable to locate or parse the project gallery page".into(),
            ));
        }
        let result = LookupResult {
            hackathon: HackathonMetadata {
                name: listing.name,
                url: hackathon_url,
                gallery_url: listing.gallery_url,
                scanned_pages: crawl.scanned_pages,
                scanned_projects: crawl.scanned_projects,
                winner_count: winners.len() as u32,
                gallery_truncated: crawl.truncated,
            },
            winners,
            generated_at: crate::util::now(),
        };
        progress.emit(completed(Stage::AssembleResult)).await?;

        Ok(result)
    }

    async fn crawl_gallery<P: ProgressSink>(
        &self,
        gallery_url: &str,
        progress: &P,
    ) -> Result<GalleryCrawl, AppError> {
        progress.emit(started(Stage::CrawlProjectGallery)).await?;

        let mut crawl = GalleryCrawl::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut announced: HashSet<String> = HashSet::new();
        let mut next_page = Some(gallery_url.to_string());

        while let Some(page_url) = next_page.take() {
            if !visited.insert(page_url.clone()) {
                tracing::warn!(%page_url, "Gallery pagination loops back, stopping");
                break;
            }
            if crawl.scanned_pages >= self.config.max_gallery_pages {
                crawl.truncated = true;
                progress
                    .emit(EventPayload::GalleryTruncated {
                        max_pages: self.config.max_gallery_pages,
                        next_page_url: page_url,
                    })
                    .await?;
                break;
            }

            let html = self
                .fetcher
                .fetch_with(&page_url, &self.config.listing_policy)
                .await?;
            let page = self.extractor.parse_gallery(&page_url, &html)?;

            crawl.scanned_pages += 1;
            crawl.scanned_projects += page.scanned_projects;

            let mut winners_on_page = 0;
            for entry in page.entries.iter().filter(|e| is_winner(e)) {
                winners_on_page += 1;
                if announced.insert(entry.project_url.clone()) {
                    progress
                        .emit(EventPayload::WinnerProjectFound {
                            project_title: entry.project_title.clone(),
                            project_url: entry.project_url.clone(),
                            software_id: entry.software_id.clone(),
                            preview_image_url: entry.preview_image_url.clone(),
                            source: None,
                        })
                        .await?;
                }
            }

            progress
                .emit(EventPayload::GalleryPageScanned {
                    page_url: page_url.clone(),
                    page_number: crawl.scanned_pages,
                    scanned_projects: page.scanned_projects,
                    winners_found_on_page: winners_on_page,
                    next_page_url: page.next_page_url.clone(),
                })
                .await?;

            crawl.entries.extend(page.entries);
            next_page = page.next_page_url;
        }

        progress.emit(completed(Stage::CrawlProjectGallery)).await?;
        Ok(crawl)
    }

    /// Fetch detail pages with bounded concurrency, handling results in
    /// discovery order.
    async fn scrape_details<P: ProgressSink>(
        &self,
        hackathon_url: &str,
        listing: &ListingPage,
        targets: Vec<GalleryEntry>,
        mode: DetailMode,
        progress: &P,
    ) -> Result<Vec<WinnerProject>, AppError> {
        let total = targets.len() as u32;
        let fetches = futures::stream::iter(targets)
            .map(|entry| async move {
                let outcome = self.scrape_project(&entry.project_url, hackathon_url).await;
                (entry, outcome)
            })
            .buffered(self.config.detail_concurrency.max(1));
        let mut fetches = pin!(fetches);

        let default_prize = PrizeAward {
            hackathon_name: listing.name.clone(),
            hackathon_url: Some(hackathon_url.to_string()),
            prize_name: "Winner".into(),
        };

        let mut winners: Vec<WinnerProject> = Vec::new();
        while let Some((entry, outcome)) = fetches.next().await {
            let project = match (mode, outcome) {
                (DetailMode::Badged, Ok(mut project)) => {
                    if project.prizes.is_empty() {
                        project.prizes = vec![default_prize.clone()];
                    }
                    project
                }
                (DetailMode::Badged, Err(err)) => {
                    tracing::warn!(url = %entry.project_url, error = %err, "Winner detail failed, keeping partial record");
                    WinnerProject::partial(&entry, vec![default_prize.clone()], warning(&err))
                }
                (DetailMode::PrizeConfirmation, Ok(project)) if !project.prizes.is_empty() => {
                    progress
                        .emit(EventPayload::WinnerProjectFound {
                            project_title: project.project_title.clone(),
                            project_url: project.project_url.clone(),
                            software_id: entry.software_id.clone(),
                            preview_image_url: project.preview_image_url.clone(),
                            source: Some(FALLBACK_SOURCE.into()),
                        })
                        .await?;
                    project
                }
                (DetailMode::PrizeConfirmation, Ok(_)) => continue,
                (DetailMode::PrizeConfirmation, Err(err)) => {
                    tracing::warn!(url = %entry.project_url, error = %err, "Candidate detail failed, skipping");
                    progress
                        .emit(EventPayload::ProjectSkipped {
                            project_url: entry.project_url.clone(),
                            warning: warning(&err),
                        })
                        .await?;
                    continue;
                }
            };

            winners.push(project);
            let index = winners.len() as u32;
            let Some(project) = winners.last() else {
                continue;
            };
            progress
                .emit(EventPayload::WinnerProjectScraped {
                    index,
                    total: total.max(index),
                    project_title: project.project_title.clone(),
                    project_url: project.project_url.clone(),
                    prize_count: project.prizes.len() as u32,
                    winner_project: Box::new(project.clone()),
                    warning: project.warning.clone(),
                })
                .await?;
        }

        Ok(winners)
    }

    async fn scrape_project(
        &self,
        project_url: &str,
        hackathon_url: &str,
    ) -> Result<WinnerProject, AppError> {
        let html = self
            .fetcher
            .fetch_with(project_url, &self.config.detail_policy)
            .await?;
        self.extractor
            .parse_project(project_url, &html, hackathon_url)
    }
}

fn started(stage: Stage) -> EventPayload {
    EventPayload::StageStarted { stage }
}

fn completed(stage: Stage) -> EventPayload {
    EventPayload::StageCompleted { stage }
}

fn warning(err: &AppError) -> ItemWarning {
    ItemWarning {
        code: err.code(),
        message: err.to_string(),
    }
}
