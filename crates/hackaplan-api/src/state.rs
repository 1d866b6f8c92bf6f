use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;

use hackaplan_client::{HackathonSearchClient, ReqwestFetcher};
use hackaplan_core::job_queue::JobQueue;
use hackaplan_core::progress::ProgressBus;
use hackaplan_core::rate_limit::RateLimiter;
use hackaplan_db::{Database, LookupRepository};

use crate::client_ip::TrustForwardedFor;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Store access and live progress for every job.
    pub bus: ProgressBus<LookupRepository>,
    /// Submission side of the running scheduler.
    pub queue: JobQueue,
    pub limiter: RateLimiter,
    pub ip_hash_salt: String,
    pub trust_forwarded_for: bool,
    /// Completed lookups younger than this are returned instead of re-run.
    pub reuse_ttl: Duration,
    pub search: HackathonSearchClient<ReqwestFetcher>,
}

impl FromRef<Arc<AppState>> for TrustForwardedFor {
    fn from_ref(state: &Arc<AppState>) -> Self {
        TrustForwardedFor(state.trust_forwarded_for)
    }
}
