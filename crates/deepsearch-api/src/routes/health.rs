use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::{AppState, CapacityReport};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: CapacityReport,
    tracing_enabled: bool,
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handle_health))
        .route("/list-apps", get(handle_list_apps))
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        capacity: state.capacity(),
        tracing_enabled: state.engine().recorder().is_some(),
    })
}

async fn handle_list_apps(State(state): State<AppState>) -> Json<Vec<&'static str>> {
    Json(state.engine().list_apps())
}
