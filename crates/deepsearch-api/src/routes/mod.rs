mod health;
mod runner;
mod traces;

use axum::Router;
use health::health_router;
use runner::runner_router;
use traces::traces_router;

use crate::state::AppState;

/// Runner routes are served both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health_router())
        .merge(runner_router())
        .merge(traces_router())
        .nest("/api", runner_router())
        .with_state(state)
}
