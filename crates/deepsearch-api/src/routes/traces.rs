use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use deepsearch_core::{EventTrace, SessionSnapshot, TraceListing, TraceRecorder};
use serde::Deserialize;

use crate::error::{ApiResult, AppError};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;

pub fn traces_router() -> Router<AppState> {
    Router::new()
        .route("/traces", get(handle_list))
        .route("/traces/:trace_id", get(handle_trace))
        .route("/snapshots/:snapshot_id", get(handle_snapshot))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    session_id: Option<String>,
    limit: Option<usize>,
}

fn recorder(state: &AppState) -> ApiResult<TraceRecorder> {
    state
        .engine()
        .recorder()
        .cloned()
        .ok_or_else(|| AppError::not_found("trace recording is disabled"))
}

async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<TraceListing>>> {
    let recorder = recorder(&state)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(
        recorder
            .list_traces(query.session_id.as_deref(), limit)
            .await,
    ))
}

async fn handle_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> ApiResult<Json<EventTrace>> {
    recorder(&state)?
        .load_event(&trace_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("trace {trace_id} not found")))
}

async fn handle_snapshot(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    recorder(&state)?
        .load_snapshot(&snapshot_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("snapshot {snapshot_id} not found")))
}
