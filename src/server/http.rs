use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::SyncError;
use crate::protocol::{
    AckCursor, MergeRequest, MergeResponse, RebuildResponse, SyncRequest, SyncResponse,
};
use crate::server::projection::{self, SetSummary, WorkoutSummary};
use crate::server::{merge, EventLog, ProjectionRebuilder, SyncService};

#[derive(Clone)]
pub struct AppState {
    log: Arc<Mutex<EventLog>>,
}

pub fn router(log: EventLog) -> Router {
    let state = AppState {
        log: Arc::new(Mutex::new(log)),
    };
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/sync", post(sync_events))
        .route("/api/v1/projections/rebuild", post(rebuild_projections))
        .route("/api/v1/users/merge", post(merge_users))
        .route("/api/v1/workouts", get(list_workouts))
        .route("/api/v1/workouts/sets/batch", get(list_sets_batch))
        .route("/api/v1/workouts/:workout_id/sets", get(list_workout_sets))
        .route(
            "/api/v1/exercises/:exercise_id/last-sets",
            get(last_sets_for_exercise),
        )
        .with_state(state)
}

pub async fn serve(log: EventLog, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(log);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"detail": self.1}))).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let status = match &e {
            SyncError::Validation(_) | SyncError::UnknownEventType(_) => StatusCode::BAD_REQUEST,
            SyncError::MergeConflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

/// The identity provider upstream stamps the authenticated user onto the
/// request; absence means an anonymous caller.
fn identity(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    let Some(raw) = headers.get("x-user-id") else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| ApiError(StatusCode::UNAUTHORIZED, "malformed x-user-id".to_string()))?;
    let user = Uuid::parse_str(raw)
        .map_err(|_| ApiError(StatusCode::UNAUTHORIZED, "malformed x-user-id".to_string()))?;
    Ok(Some(user))
}

fn require_identity(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    identity(headers)?.ok_or_else(|| {
        ApiError(
            StatusCode::UNAUTHORIZED,
            "authenticated identity required".to_string(),
        )
    })
}

async fn sync_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    if let Some(authenticated) = identity(&headers)? {
        if authenticated != request.user_id {
            return Err(ApiError(
                StatusCode::FORBIDDEN,
                "user_id in request does not match authenticated user".to_string(),
            ));
        }
    }

    let log = state.log.lock().await;
    let summary = SyncService::new(&log).sync_events(
        request.device_id,
        request.user_id,
        &request.events,
    )?;
    Ok(Json(SyncResponse {
        ack_cursor: AckCursor {
            device_id: request.device_id,
            last_acked_sequence: summary.last_acked_sequence,
        },
        accepted_count: summary.accepted_count,
        rejected_count: summary.rejected_count,
        rejected_event_ids: summary.rejected_event_ids,
    }))
}

async fn rebuild_projections(
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let log = state.log.lock().await;
    let started = Instant::now();
    let stats = ProjectionRebuilder::new(&log).rebuild(None)?;
    Ok(Json(RebuildResponse {
        workouts_written: stats.workouts_written,
        sets_written: stats.sets_written,
        duration_ms: started.elapsed().as_millis() as u64,
    }))
}

async fn merge_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    let authenticated = require_identity(&headers)?;
    let log = state.log.lock().await;
    let outcome = merge::merge_user_data(&log, request.anonymous_user_id, authenticated)?;
    Ok(Json(MergeResponse {
        merged_event_count: outcome.merged_event_count,
    }))
}

async fn list_workouts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkoutSummary>>, ApiError> {
    let authenticated = require_identity(&headers)?;
    let log = state.log.lock().await;
    Ok(Json(projection::list_workouts(&log, authenticated)?))
}

async fn list_workout_sets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workout_id): Path<Uuid>,
) -> Result<Json<Vec<SetSummary>>, ApiError> {
    let authenticated = require_identity(&headers)?;
    let log = state.log.lock().await;
    match projection::workout_owner(&log, workout_id)? {
        Some(owner) if owner == authenticated => Ok(Json(projection::list_sets(&log, workout_id)?)),
        _ => Err(ApiError(
            StatusCode::NOT_FOUND,
            "workout not found".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct BatchSetsQuery {
    /// Comma-separated workout ids.
    workout_ids: String,
}

/// Sets for several workouts at once, so a history screen does not issue one
/// request per workout.
async fn list_sets_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BatchSetsQuery>,
) -> Result<Json<Vec<SetSummary>>, ApiError> {
    let authenticated = require_identity(&headers)?;
    let mut workout_ids: Vec<Uuid> = Vec::new();
    for raw in query
        .workout_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let id = Uuid::parse_str(raw).map_err(|_| {
            ApiError(
                StatusCode::BAD_REQUEST,
                format!("malformed workout id '{raw}'"),
            )
        })?;
        if !workout_ids.contains(&id) {
            workout_ids.push(id);
        }
    }
    if workout_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let log = state.log.lock().await;
    // all-or-nothing ownership: every requested workout must belong to the caller
    let owned = projection::owned_workout_count(&log, authenticated, &workout_ids)?;
    if owned != workout_ids.len() {
        return Err(ApiError(
            StatusCode::FORBIDDEN,
            "one or more workouts do not belong to the authenticated user".to_string(),
        ));
    }
    Ok(Json(projection::list_sets_for_workouts(&log, &workout_ids)?))
}

/// Sets from the caller's most recent workout containing the exercise; the
/// lookup behind "what did I lift last time".
async fn last_sets_for_exercise(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(exercise_id): Path<Uuid>,
) -> Result<Json<Vec<SetSummary>>, ApiError> {
    let authenticated = require_identity(&headers)?;
    let log = state.log.lock().await;
    let sets = projection::last_sets_for_exercise(&log, authenticated, exercise_id)?;
    if sets.is_empty() {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            "no previous workout found for this exercise".to_string(),
        ));
    }
    Ok(Json(sets))
}
