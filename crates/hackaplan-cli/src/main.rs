use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use hackaplan_client::{DevpostExtractor, HackathonSearchClient, ReqwestFetcher};
use hackaplan_core::config::LookupConfig;
use hackaplan_core::error::AppError;
use hackaplan_core::models::LookupResult;
use hackaplan_core::pipeline::ScrapePipeline;
use hackaplan_core::progress::TracingSink;
use hackaplan_core::snapshot::{ManifestEntry, SnapshotManifest, SnapshotShard, shard_relative_path};
use hackaplan_core::traits::LookupStore;
use hackaplan_db::{Database, DatabaseConfig};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Parser)]
#[command(name = "hackaplan", version, about = "Hackathon winner lookups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one lookup in-process and print the result as JSON
    Lookup {
        /// Hackathon URL, e.g. https://example.devpost.com
        #[arg(short, long)]
        url: String,

        /// Also write a snapshot shard and update the manifest in this directory
        #[arg(long, env = "HACKAPLAN_SHARD_DIR")]
        shard_dir: Option<PathBuf>,
    },

    /// Show a stored lookup job
    Status {
        /// Lookup ID
        #[arg(short, long)]
        id: Uuid,

        /// SQLite database URL, overriding DATABASE_URL
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Search hackathons by name
    Search {
        /// Hackathon name or part of it
        #[arg(short, long)]
        query: String,

        /// Maximum number of suggestions (1-20)
        #[arg(short, long, default_value_t = hackaplan_client::search::DEFAULT_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hackaplan=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = LookupConfig::from_env()?;

    match cli.command {
        Commands::Lookup { url, shard_dir } => {
            cmd_lookup(&config, &url, shard_dir.as_deref()).await?;
        }
        Commands::Status { id, database_url } => {
            let mut db_config = DatabaseConfig::from_env()?;
            if let Some(url) = database_url {
                db_config.url = url;
            }
            cmd_status(&db_config, id).await?;
        }
        Commands::Search { query, limit } => {
            cmd_search(&config, &query, limit).await?;
        }
    }

    Ok(())
}

async fn cmd_lookup(config: &LookupConfig, url: &str, shard_dir: Option<&Path>) -> Result<()> {
    let fetcher = ReqwestFetcher::new(&config.user_agent)?;
    let pipeline = ScrapePipeline::new(fetcher, DevpostExtractor::new(), config.pipeline_config());

    tracing::info!(%url, "Looking up winners");
    let result = tokio::time::timeout(config.job_timeout, pipeline.run(url, &TracingSink))
        .await
        .map_err(|_| AppError::JobTimeout(config.job_timeout))??;

    tracing::info!(
        winners = result.hackathon.winner_count,
        scanned_pages = result.hackathon.scanned_pages,
        scanned_projects = result.hackathon.scanned_projects,
        "Lookup complete"
    );

    if let Some(dir) = shard_dir {
        let path = write_snapshot(dir, &result)?;
        tracing::info!(path = %path.display(), "Snapshot shard written");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Write `result` as a shard under `dir` and upsert its manifest entry.
/// Returns the shard's path.
fn write_snapshot(dir: &Path, result: &LookupResult) -> Result<PathBuf> {
    let shard = SnapshotShard::from_result(result.clone());
    let shard_path = dir.join(shard_relative_path(&shard.hackathon_url)?);
    if let Some(parent) = shard_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&shard_path, shard.to_json()?)
        .with_context(|| format!("Failed to write {}", shard_path.display()))?;

    let manifest_path = dir.join(MANIFEST_FILE);
    let mut manifest = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => serde_json::from_str::<SnapshotManifest>(&raw)
            .with_context(|| format!("Invalid manifest at {}", manifest_path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SnapshotManifest::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", manifest_path.display()));
        }
    };
    manifest.upsert(ManifestEntry::for_shard(&shard)?);
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    Ok(shard_path)
}

async fn cmd_status(db_config: &DatabaseConfig, id: Uuid) -> Result<()> {
    let db = Database::connect(db_config).await?;
    db.migrate().await?;
    let repo = db.lookup_repo();

    let job = repo
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
    let events = repo.list_events(id).await?;
    let result = repo.get_result(id).await?;

    let last_event = events.last().map(|e| e.event_type());
    let report = serde_json::json!({
        "job": job,
        "progress_events": events.len(),
        "last_event": last_event,
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_search(config: &LookupConfig, query: &str, limit: usize) -> Result<()> {
    let fetcher = ReqwestFetcher::new(&config.user_agent)?;
    let client = HackathonSearchClient::new(fetcher, config.listing_policy());

    let suggestions = client.search(query, limit).await?;
    if suggestions.is_empty() {
        tracing::info!(%query, "No hackathons found");
    }
    println!("{}", serde_json::to_string_pretty(&suggestions)?);
    Ok(())
}
