//! Background job introspection routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use crate::background_jobs::SchedulerHandle;
use crate::server::state::{OptionalSchedulerHandle, ServerState};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

fn get_scheduler(handle: &OptionalSchedulerHandle) -> Result<&SchedulerHandle, Response> {
    handle.as_ref().ok_or_else(|| {
        (StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not available").into_response()
    })
}

/// GET /jobs - List all registered jobs
async fn list_jobs(State(handle): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };

    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => {
            warn!("Failed to list jobs: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs").into_response()
        }
    }
}

/// GET /jobs/{id} - Get a single job
async fn get_job(
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };

    match scheduler.get_job(&job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to get job {}: {:#}", job_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job").into_response()
        }
    }
}

/// GET /jobs/{id}/history - Recent executions of a job, newest first
async fn get_job_history(
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };

    if !scheduler.job_exists(&job_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    match scheduler.get_job_history(&job_id, limit) {
        Ok(history) => Json(history).into_response(),
        Err(e) => {
            warn!("Failed to get history for job {}: {:#}", job_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job history").into_response()
        }
    }
}

pub fn jobs_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/history", get(get_job_history))
}
