use std::sync::Arc;

use axum::http::StatusCode;
use deepsearch_core::ResearchEngine;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{ApiResult, AppError};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<ResearchEngine>,
    run_permits: Arc<Semaphore>,
    max_runs: usize,
}

#[derive(Debug, Serialize)]
pub struct CapacityReport {
    pub max_runs: usize,
    pub available_runs: usize,
    pub active_runs: usize,
}

impl AppState {
    pub fn new(engine: ResearchEngine, max_runs: usize) -> Self {
        let max_runs = max_runs.max(1);
        Self {
            engine: Arc::new(engine),
            run_permits: Arc::new(Semaphore::new(max_runs)),
            max_runs,
        }
    }

    pub fn engine(&self) -> Arc<ResearchEngine> {
        self.engine.clone()
    }

    /// Reserve a pipeline run slot; 429 when every slot is busy.
    pub fn acquire_run_permit(&self) -> ApiResult<OwnedSemaphorePermit> {
        match self.run_permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "run capacity reached; retry once a slot frees up",
            )),
            Err(TryAcquireError::Closed) => Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "pipeline executor unavailable",
            )),
        }
    }

    pub fn capacity(&self) -> CapacityReport {
        let available = self.run_permits.available_permits();
        CapacityReport {
            max_runs: self.max_runs,
            available_runs: available,
            active_runs: self.max_runs.saturating_sub(available),
        }
    }
}
