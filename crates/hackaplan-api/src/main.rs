use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use hackaplan_api::routes;
use hackaplan_api::state::AppState;
use hackaplan_client::{DevpostExtractor, HackathonSearchClient, ReqwestFetcher};
use hackaplan_core::config::LookupConfig;
use hackaplan_core::pipeline::ScrapePipeline;
use hackaplan_core::progress::ProgressBus;
use hackaplan_core::worker::{LookupScheduler, TracingWorkerReporter};
use hackaplan_db::{Database, DatabaseConfig, RateLimitRepository};

const AUDIT_RETENTION: chrono::TimeDelta = chrono::TimeDelta::days(2);
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hackaplan=info".parse()?))
        .with_target(false)
        .init();

    let config = LookupConfig::from_env()?;
    let host = std::env::var("HACKAPLAN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("HACKAPLAN_PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("{host}:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let fetcher = ReqwestFetcher::new(&config.user_agent)?;
    let pipeline = ScrapePipeline::new(
        fetcher.clone(),
        DevpostExtractor::new(),
        config.pipeline_config(),
    );
    let bus = ProgressBus::new(db.lookup_repo());
    let scheduler = LookupScheduler::new(bus.clone(), pipeline, config.worker_config())
        .start(TracingWorkerReporter);

    let state = Arc::new(AppState {
        db: db.clone(),
        bus,
        queue: scheduler.queue(),
        limiter: config.rate_limit.build_limiter(),
        ip_hash_salt: config.rate_limit.ip_hash_salt.clone(),
        trust_forwarded_for: config.rate_limit.trust_forwarded_for,
        reuse_ttl: config.cache_ttl,
        search: HackathonSearchClient::new(fetcher, config.listing_policy()),
    });

    let cancel = CancellationToken::new();
    let pruner = tokio::spawn(prune_audit_rows(db.rate_limit_repo(), cancel.clone()));

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(std::env::var("HACKAPLAN_CORS_ORIGINS").ok().as_deref()));

    tracing::info!(
        rate_limit = config.rate_limit.enabled,
        trust_forwarded_for = config.rate_limit.trust_forwarded_for,
        job_timeout_s = config.job_timeout.as_secs(),
        "Starting server on {addr}"
    );
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    let _ = pruner.await;
    scheduler.stop().await?;
    db.pool().close().await;

    Ok(())
}

/// `*` or unset allows any origin; otherwise a comma-separated list.
fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .unwrap_or("*")
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
    }
}

async fn prune_audit_rows(repo: RateLimitRepository, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let cutoff = hackaplan_core::util::now() - AUDIT_RETENTION;
        match repo.prune(cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Pruned rate limit audit rows"),
            Err(err) => tracing::warn!(error = %err, "Failed to prune rate limit audit rows"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
