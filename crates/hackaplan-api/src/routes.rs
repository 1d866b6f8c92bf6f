use std::sync::Arc;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use hackaplan_client::search::DEFAULT_LIMIT;
use hackaplan_core::error::AppError;
use hackaplan_core::job::JobStatus;
use hackaplan_core::progress::Subscription;
use hackaplan_core::rate_limit::{Admission, RateLimiter};
use hackaplan_core::traits::LookupStore;
use hackaplan_core::urls::normalize_hackathon_url;
use hackaplan_db::LookupRepository;

use crate::client_ip::ClientIp;
use crate::dto::{
    CreateLookupRequest, CreateLookupResponse, HealthResponse, LookupResponse,
    ProgressEventResponse, SearchQuery, SearchResponse, SuggestionResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/lookups", post(create_lookup))
        .route("/lookups/{id}", get(get_lookup))
        .route("/lookups/{id}/ws", get(lookup_events))
        .route("/hackathons/search", get(search_hackathons))
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

/// Unknown and malformed ids are both simply not found.
fn parse_lookup_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::JobNotFound(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/lookups",
    request_body = CreateLookupRequest,
    responses(
        (status = 201, description = "Lookup queued", body = CreateLookupResponse),
        (status = 200, description = "Existing active or recent lookup reused", body = CreateLookupResponse),
        (status = 400, description = "Not a hackathon URL", body = crate::dto::ErrorResponse),
        (status = 429, description = "Rate limited", body = crate::dto::ErrorResponse),
    ),
    tag = "lookups"
)]
pub async fn create_lookup(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    axum::Json(body): axum::Json<CreateLookupRequest>,
) -> Result<Response, ApiError> {
    admit(&state, &ip).await?;

    let hackathon_url = normalize_hackathon_url(&body.hackathon_url)?;

    let reused = state
        .queue
        .reuse(state.bus.store(), &hackathon_url, state.reuse_ttl)
        .await?;
    if let Some(job) = reused {
        tracing::info!(job_id = %job.id, url = %hackathon_url, status = %job.status, "Reusing lookup");
        let response = CreateLookupResponse::from(&job);
        return Ok((StatusCode::OK, axum::Json(response)).into_response());
    }

    let job = state.queue.submit(&state.bus, &hackathon_url).await?;
    let response = CreateLookupResponse::from(&job);
    Ok((StatusCode::CREATED, axum::Json(response)).into_response())
}

/// Admission is checked against windows seeded from the audit table, so a
/// restart does not hand out a fresh budget.
async fn admit(state: &AppState, ip: &str) -> Result<(), AppError> {
    if !state.limiter.is_enabled() {
        return Ok(());
    }

    let identity = RateLimiter::fingerprint(ip, &state.ip_hash_salt);
    let ledger = state.db.rate_limit_repo();
    match state.limiter.admit_recorded(&identity, &ledger).await? {
        Admission::Denied { retry_after } => {
            tracing::info!(
                identity = &identity[..12],
                retry_after_s = retry_after.as_secs(),
                "Lookup rate limited"
            );
            Err(AppError::RateLimited { retry_after })
        }
        Admission::Allowed => Ok(()),
    }
}

#[utoipa::path(
    get,
    path = "/lookups/{id}",
    params(
        ("id" = Uuid, Path, description = "Lookup ID")
    ),
    responses(
        (status = 200, description = "Job record with its full progress log", body = LookupResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "lookups"
)]
pub async fn get_lookup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_lookup_id(&id)?;
    let store = state.bus.store();

    let job = store
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
    let events = store.list_events(id).await?;
    let result = if job.status == JobStatus::Completed {
        store.get_result(id).await?
    } else {
        None
    };

    Ok(axum::Json(LookupResponse::build(job, &events, result)?))
}

/// Push a job's log over a WebSocket: backlog first, then live events,
/// closing after the terminal one.
pub async fn lookup_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let id = parse_lookup_id(&id)?;
    let subscription = state.bus.subscribe(id).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription)))
}

async fn stream_events(mut socket: WebSocket, mut subscription: Subscription<LookupRepository>) {
    let job_id = subscription.job_id();
    loop {
        let next = tokio::select! {
            next = subscription.next() => next,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    tracing::debug!(%job_id, "Progress subscriber went away");
                    return;
                }
                Some(Ok(_)) => continue,
            },
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "Progress stream failed");
                break;
            }
        };

        let frame = ProgressEventResponse::try_from(&event)
            .and_then(|frame| serde_json::to_string(&frame).map_err(AppError::from));
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "Failed to encode progress frame");
                break;
            }
        };
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/hackathons/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Ranked suggestions", body = SearchResponse),
        (status = 502, description = "Upstream search failed", body = crate::dto::ErrorResponse),
    ),
    tag = "search"
)]
pub async fn search_hackathons(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.query.trim().to_string();
    let suggestions = state
        .search
        .search(&query, params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    Ok(axum::Json(SearchResponse {
        query,
        suggestions: suggestions.into_iter().map(SuggestionResponse::from).collect(),
    }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.bus.store().health_check().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        database: db_status,
    };

    (status, axum::Json(response))
}
