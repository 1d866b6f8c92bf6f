//! Hackathon autocomplete against the site's public search API.

use std::collections::{HashMap, HashSet};

use hackaplan_core::error::AppError;
use hackaplan_core::retry::{RetryPolicy, RetryingFetcher};
use hackaplan_core::traits::Fetcher;
use hackaplan_core::urls::normalize_hackathon_url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const SEARCH_API_URL: &str = "https://devpost.com/api/hackathons";
pub const DEFAULT_LIMIT: usize = 8;
pub const MAX_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HackathonSuggestion {
    pub title: String,
    pub hackathon_url: String,
    pub gallery_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub open_state: Option<String>,
    pub winners_announced: Option<bool>,
    pub submission_period_dates: Option<String>,
    pub organization_name: Option<String>,
}

impl HackathonSuggestion {
    /// Fill fields this suggestion lacks from another sighting of it.
    fn absorb(&mut self, other: HackathonSuggestion) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().is_none_or(str::is_empty) {
                if let Some(value) = value.filter(|v| !v.is_empty()) {
                    *slot = Some(value);
                }
            }
        }
        fill(&mut self.gallery_url, other.gallery_url);
        fill(&mut self.thumbnail_url, other.thumbnail_url);
        fill(&mut self.open_state, other.open_state);
        fill(&mut self.submission_period_dates, other.submission_period_dates);
        fill(&mut self.organization_name, other.organization_name);
        if self.winners_announced.is_none() {
            self.winners_announced = other.winners_announced;
        }
    }
}

/// Searches hackathons by name through the site's JSON API.
#[derive(Clone)]
pub struct HackathonSearchClient<F: Fetcher> {
    fetcher: RetryingFetcher<F>,
    policy: RetryPolicy,
    api_url: String,
}

impl<F: Fetcher> HackathonSearchClient<F> {
    pub fn new(fetcher: F, policy: RetryPolicy) -> Self {
        Self {
            fetcher: RetryingFetcher::new(fetcher),
            policy,
            api_url: SEARCH_API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Ranked suggestions for `query`, at most `limit` (clamped to 1..=20).
    ///
    /// Queries shorter than two characters return nothing without a request.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<HackathonSuggestion>, AppError> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, MAX_LIMIT);

        let mut order: Vec<String> = Vec::new();
        let mut by_url: HashMap<String, HackathonSuggestion> = HashMap::new();

        for variant in query_variants(query) {
            let url = self.request_url(&variant)?;
            let body = self.fetcher.fetch_with(&url, &self.policy).await?;
            let payload: Value = serde_json::from_str(&body).map_err(|e| {
                AppError::MalformedResponse(format!("Search API returned invalid JSON: {e}"))
            })?;

            let Some(hackathons) = payload.get("hackathons").and_then(Value::as_array) else {
                continue;
            };
            for suggestion in hackathons.iter().filter_map(parse_suggestion) {
                match by_url.get_mut(&suggestion.hackathon_url) {
                    Some(existing) => existing.absorb(suggestion),
                    None => {
                        order.push(suggestion.hackathon_url.clone());
                        by_url.insert(suggestion.hackathon_url.clone(), suggestion);
                    }
                }
            }
        }

        let mut ranked: Vec<(i64, u32, String, HackathonSuggestion)> = order
            .into_iter()
            .filter_map(|url| by_url.remove(&url))
            .map(|s| (score(&s, query), newest_year(&s), s.title.to_lowercase(), s))
            .collect();
        ranked.sort_by(|a, b| (b.0, b.1, &b.2).cmp(&(a.0, a.1, &a.2)));

        tracing::debug!(%query, results = ranked.len(), "Hackathon search finished");
        Ok(ranked.into_iter().take(limit).map(|(.., s)| s).collect())
    }

    fn request_url(&self, variant: &str) -> Result<String, AppError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid search API URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("search", variant)
            .append_pair("page", "1");
        Ok(url.to_string())
    }
}

/// Lowercased alphanumerics only.
fn match_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Spellings to try: as typed, squashed to a key, and without or with
/// dashes instead of spaces. Case-insensitive duplicates and anything
/// shorter than two characters are dropped.
pub fn query_variants(query: &str) -> Vec<String> {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut candidates = vec![collapsed.clone(), match_key(&collapsed)];
    if collapsed.contains(' ') {
        candidates.push(collapsed.replace(' ', ""));
        candidates.push(collapsed.replace(' ', "-"));
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| c.chars().count() >= 2)
        .filter(|c| seen.insert(c.to_lowercase()))
        .collect()
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_suggestion(raw: &Value) -> Option<HackathonSuggestion> {
    let title = str_field(raw, "title")?;
    let hackathon_url = normalize_hackathon_url(&str_field(raw, "url")?).ok()?;
    Some(HackathonSuggestion {
        title,
        hackathon_url,
        gallery_url: str_field(raw, "submission_gallery_url"),
        thumbnail_url: str_field(raw, "thumbnail_url").map(|t| match t.strip_prefix("//") {
            Some(rest) => format!("https://{rest}"),
            None => t,
        }),
        open_state: raw.get("open_state").and_then(Value::as_str).map(str::to_string),
        winners_announced: raw.get("winners_announced").and_then(Value::as_bool),
        submission_period_dates: raw
            .get("submission_period_dates")
            .and_then(Value::as_str)
            .map(str::to_string),
        organization_name: raw
            .get("organization_name")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn subdomain(hackathon_url: &str) -> String {
    Url::parse(hackathon_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .and_then(|host| host.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Relevance of a suggestion: a prefix match on title or subdomain beats a
/// substring match; every query token found adds a little.
pub fn score(suggestion: &HackathonSuggestion, query: &str) -> i64 {
    let subdomain = subdomain(&suggestion.hackathon_url);
    let title_lower = suggestion.title.to_lowercase();
    let title_key = match_key(&suggestion.title);
    let subdomain_key = match_key(&subdomain);
    let query_key = match_key(query);

    let mut score = 0;
    if !query_key.is_empty() {
        if title_key.starts_with(&query_key) || subdomain_key.starts_with(&query_key) {
            score += 120;
        } else if title_key.contains(&query_key) || subdomain_key.contains(&query_key) {
            score += 80;
        }
    }

    let query_lower = query.to_lowercase();
    let tokens = query_lower
        .split(|c: char| !c.is_ascii_lowercase() && !c.is_ascii_digit())
        .filter(|t| !t.is_empty());
    for token in tokens {
        if title_lower.contains(token) || subdomain.contains(token) {
            score += 12;
        }
    }
    score
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Latest 19xx/20xx year mentioned in the title or URL, 0 if none.
pub fn newest_year(suggestion: &HackathonSuggestion) -> u32 {
    let text = format!("{} {}", suggestion.title, suggestion.hackathon_url);
    let bytes = text.as_bytes();
    let mut newest = 0;
    for start in 0..bytes.len().saturating_sub(3) {
        let window = &bytes[start..start + 4];
        let end = start + 4;
        let is_word_start = start == 0 || !is_word_byte(bytes[start - 1]);
        let is_word_end = end == bytes.len() || !is_word_byte(bytes[end]);
        if !is_word_start || !is_word_end || !window.iter().all(u8::is_ascii_digit) {
            continue;
        }
        if window.starts_with(b"19") || window.starts_with(b"20") {
            let year = window.iter().fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
            newest = newest.max(year);
        }
    }
    newest
}
