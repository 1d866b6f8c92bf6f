//! Static snapshot cache shapes.
//!
//! A shard holds one precomputed lookup result; the manifest indexes the
//! shards. Both share field names with live job results so a client can
//! use either without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{LookupResult, compute_hash};
use crate::urls::normalize_hackathon_url;
use crate::util::timestamp;

pub const SNAPSHOT_VERSION: &str = "v1";

/// Path of a URL's shard, relative to the snapshot root.
pub fn shard_relative_path(hackathon_url: &str) -> Result<String, AppError> {
    let normalized = normalize_hackathon_url(hackathon_url)?;
    Ok(format!("shards/{}.json", compute_hash(&normalized)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotShard {
    pub version: String,
    pub hackathon_url: String,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub result: LookupResult,
}

impl SnapshotShard {
    pub fn from_result(result: LookupResult) -> Self {
        Self {
            version: SNAPSHOT_VERSION.into(),
            hackathon_url: result.hackathon.url.clone(),
            generated_at: result.generated_at,
            result,
        }
    }

    pub fn into_result(self) -> LookupResult {
        self.result
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a shard, rejecting versions this build doesn't understand.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let shard: Self = serde_json::from_str(raw)?;
        if shard.version != SNAPSHOT_VERSION {
            return Err(AppError::ParseError(format!(
                "Unsupported snapshot version '{}'",
                shard.version
            )));
        }
        Ok(shard)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hackathon_url: String,
    pub hackathon_title: String,
    pub shard_path: String,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub winner_count: u32,
    pub scanned_pages: u32,
    pub scanned_projects: u32,
}

impl ManifestEntry {
    pub fn for_shard(shard: &SnapshotShard) -> Result<Self, AppError> {
        let hackathon = &shard.result.hackathon;
        Ok(Self {
            hackathon_url: shard.hackathon_url.clone(),
            hackathon_title: hackathon.name.clone(),
            shard_path: shard_relative_path(&shard.hackathon_url)?,
            generated_at: shard.generated_at,
            winner_count: hackathon.winner_count,
            scanned_pages: hackathon.scanned_pages,
            scanned_projects: hackathon.scanned_projects,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: String,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Default for SnapshotManifest {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION.into(),
            generated_at: crate::util::now(),
            entries: Vec::new(),
        }
    }
}

impl SnapshotManifest {
    /// Insert or replace the entry for `entry.hackathon_url`, keeping the
    /// entries sorted by URL.
    pub fn upsert(&mut self, entry: ManifestEntry) {
        self.generated_at = crate::util::now().max(entry.generated_at);
        match self
            .entries
            .iter_mut()
            .find(|e| e.hackathon_url == entry.hackathon_url)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.entries
            .sort_by(|a, b| a.hackathon_url.cmp(&b.hackathon_url));
    }

    pub fn find(&self, hackathon_url: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.hackathon_url == hackathon_url)
    }
}
