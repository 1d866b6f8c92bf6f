use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorCode;
use crate::util::timestamp;

/// Final, immutable output of a completed lookup.
///
/// Field names are shared with the static snapshot shards, so clients can
/// merge live and cached results without translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub hackathon: HackathonMetadata,
    /// Winners in discovery order, unique by `project_url`.
    pub winners: Vec<WinnerProject>,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HackathonMetadata {
    pub name: String,
    pub url: String,
    pub gallery_url: String,
    pub scanned_pages: u32,
    pub scanned_projects: u32,
    pub winner_count: u32,
    /// Set when the gallery crawl stopped at the page cap.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub gallery_truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerProject {
    pub project_title: String,
    pub project_url: String,
    pub tagline: Option<String>,
    pub preview_image_url: Option<String>,
    pub prizes: Vec<PrizeAward>,
    pub team_members: Vec<TeamMember>,
    pub built_with: Vec<TechTag>,
    pub external_links: Vec<ExternalLink>,
    pub description_sections: Vec<DescriptionSection>,
    /// Present only when the detail page could not be scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ItemWarning>,
}

impl WinnerProject {
    /// Winner record built from gallery data alone, used when its detail
    /// page failed.
    pub fn partial(entry: &GalleryEntry, prizes: Vec<PrizeAward>, warning: ItemWarning) -> Self {
        Self {
            project_title: entry.project_title.clone(),
            project_url: entry.project_url.clone(),
            tagline: None,
            preview_image_url: entry.preview_image_url.clone(),
            prizes,
            team_members: Vec::new(),
            built_with: Vec::new(),
            external_links: Vec::new(),
            description_sections: Vec::new(),
            warning: Some(warning),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrizeAward {
    pub hackathon_name: String,
    pub hackathon_url: Option<String>,
    pub prize_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechTag {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionSection {
    pub heading: String,
    pub content: String,
}

/// Per-item degradation notice attached to a partially scraped winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemWarning {
    pub code: ErrorCode,
    pub message: String,
}

/// What the extractor reads off a hackathon's landing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub name: String,
    pub gallery_url: String,
    /// False when the page says results are still pending.
    pub winners_announced: bool,
}

/// One card in the project gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub project_title: String,
    pub project_url: String,
    pub software_id: Option<String>,
    pub preview_image_url: Option<String>,
    /// Carries a winner badge.
    pub is_winner: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GalleryPage {
    pub entries: Vec<GalleryEntry>,
    /// Cards seen on the page, including ones without a usable link.
    pub scanned_projects: u32,
    pub next_page_url: Option<String>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
