use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::post,
};
use deepsearch_core::{Feedback, RunRequest, RunResponse, SessionInfo};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn runner_router() -> Router<AppState> {
    Router::new()
        .route("/apps/:app/users/:user/sessions", post(handle_create_session))
        .route(
            "/apps/:app/users/:user/sessions/:session",
            post(handle_create_named_session),
        )
        .route("/run", post(handle_run))
        .route("/run_sse", post(handle_run_sse))
        .route("/feedback", post(handle_feedback))
        .route("/query", post(handle_query))
}

async fn create_session(
    state: &AppState,
    app: &str,
    user: &str,
    session: Option<String>,
) -> (StatusCode, Json<SessionInfo>) {
    let info = state.engine().create_session(app, user, session).await;
    let status = if info.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(info))
}

async fn handle_create_session(
    State(state): State<AppState>,
    Path((app, user)): Path<(String, String)>,
) -> (StatusCode, Json<SessionInfo>) {
    create_session(&state, &app, &user, None).await
}

async fn handle_create_named_session(
    State(state): State<AppState>,
    Path((app, user, session)): Path<(String, String, String)>,
) -> (StatusCode, Json<SessionInfo>) {
    create_session(&state, &app, &user, Some(session)).await
}

async fn handle_run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> ApiResult<Json<RunResponse>> {
    let _permit = state.acquire_run_permit()?;
    let response = state.engine().run(request).await?;
    Ok(Json(response))
}

/// Runs the pipeline to completion, then replays its events as server-sent events.
async fn handle_run_sse(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    let _permit = state.acquire_run_permit()?;
    let response = state.engine().run(request).await?;
    info!(session_id = %response.session_id, events = response.events.len(), "streaming run events");
    let events = response
        .events
        .into_iter()
        .map(|event| SseEvent::default().json_data(event));
    Ok(Sse::new(stream::iter(events)).keep_alive(KeepAlive::default()))
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(feedback): Json<Feedback>,
) -> StatusCode {
    state.engine().register_feedback(&feedback);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    session_id: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<Value>> {
    let _permit = state.acquire_run_permit()?;
    let answer = state
        .engine()
        .query(&request.query, request.session_id)
        .await;
    Ok(Json(answer))
}
