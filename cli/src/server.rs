use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use stride_core::models::{Goal, ProgressEntry, validate_goal, validate_progress_entry};
use stride_core::store::SqliteStore;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    store: SqliteStore,
    api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct ChangesQuery {
    owner: String,
    since: Option<String>,
}

#[derive(Deserialize, Serialize)]
pub(crate) struct SoftDeleteRequest {
    pub(crate) deleted_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn parse_since(since: Option<&str>) -> Result<DateTime<Utc>, ApiError> {
    match since {
        None => Ok(DateTime::<Utc>::UNIX_EPOCH),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ApiError::BadRequest(format!("Invalid timestamp '{s}'. Use RFC 3339"))),
    }
}

fn check_id(path_id: &str, body_id: &str) -> Result<(), ApiError> {
    if body_id != path_id {
        return Err(ApiError::BadRequest(format!(
            "Body id '{body_id}' does not match path id '{path_id}'"
        )));
    }
    Ok(())
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Goal handlers ---

async fn upsert_goal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(goal): Json<Goal>,
) -> Result<Json<Goal>, ApiError> {
    check_id(&id, &goal.id)?;
    validate_goal(&goal).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let db = state.store.lock();
    db.upsert_goal(&goal).context("failed to store goal")?;
    Ok(Json(goal))
}

async fn delete_goal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SoftDeleteRequest>,
) -> Result<Json<Goal>, ApiError> {
    let db = state.store.lock();
    if !db
        .soft_delete_goal(&id, &req.deleted_at)
        .context("failed to delete goal")?
    {
        return Err(ApiError::NotFound(format!("Goal {id} not found")));
    }
    let goal = db
        .get_goal(&id)
        .context("failed to load goal")?
        .ok_or_else(|| ApiError::NotFound(format!("Goal {id} not found")))?;
    Ok(Json(goal))
}

async fn list_goals(
    State(state): State<AppState>,
    Query(params): Query<ChangesQuery>,
) -> Result<Json<Vec<Goal>>, ApiError> {
    let since = parse_since(params.since.as_deref())?;
    let db = state.store.lock();
    let goals = db
        .goals_updated_since(&params.owner, &since)
        .context("failed to query goals")?;
    Ok(Json(goals))
}

// --- Progress handlers ---

async fn upsert_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(entry): Json<ProgressEntry>,
) -> Result<Json<ProgressEntry>, ApiError> {
    check_id(&id, &entry.id)?;
    validate_progress_entry(&entry).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let db = state.store.lock();
    db.upsert_progress(&entry)
        .context("failed to store progress entry")?;
    Ok(Json(entry))
}

async fn delete_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SoftDeleteRequest>,
) -> Result<Json<ProgressEntry>, ApiError> {
    let db = state.store.lock();
    if !db
        .soft_delete_progress(&id, &req.deleted_at)
        .context("failed to delete progress entry")?
    {
        return Err(ApiError::NotFound(format!("Progress entry {id} not found")));
    }
    let entry = db
        .get_progress(&id)
        .context("failed to load progress entry")?
        .ok_or_else(|| ApiError::NotFound(format!("Progress entry {id} not found")))?;
    Ok(Json(entry))
}

async fn list_progress(
    State(state): State<AppState>,
    Query(params): Query<ChangesQuery>,
) -> Result<Json<Vec<ProgressEntry>>, ApiError> {
    let since = parse_since(params.since.as_deref())?;
    let db = state.store.lock();
    let entries = db
        .progress_updated_since(&params.owner, &since)
        .context("failed to query progress entries")?;
    Ok(Json(entries))
}

pub(crate) fn build_router(store: SqliteStore, api_key: Option<String>) -> Router {
    let state = AppState { store, api_key };
    Router::new()
        .route("/api/goals", get(list_goals))
        .route("/api/goals/{id}", put(upsert_goal))
        .route("/api/goals/{id}/delete", post(delete_goal))
        .route("/api/progress", get(list_progress))
        .route("/api/progress/{id}", put(upsert_progress))
        .route("/api/progress/{id}/delete", post(delete_progress))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    store: SqliteStore,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let app = build_router(store, api_key.clone());

    if let Some(ref key) = api_key {
        let prefix: String = key.chars().take(4).collect();
        eprintln!("API key: {prefix}... (see api_key file in data directory)");
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, "sync server started");
    axum::serve(listener, app).await?;

    Ok(())
}
