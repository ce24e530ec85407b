//! Job and run log HTTP routes.
//!
//! Provides endpoints for:
//! - Listing jobs and triggering on-demand runs
//! - Browsing a job's audit log
//! - Querying the run log, its statistics and recent failures

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::background_jobs::{JobError, SchedulerHandle};
use crate::server::state::{GuardedServerStore, OptionalSchedulerHandle, ServerState};
use crate::server_store::{RunQuery, RunStatus};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub task: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    #[serde(default = "default_failures_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

fn default_failures_limit() -> usize {
    20
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    warn!("Job route failed: {:#}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
}

// =============================================================================
// Helper to extract the scheduler handle
// =============================================================================

fn get_scheduler(handle: &OptionalSchedulerHandle) -> Result<&SchedulerHandle, Response> {
    handle.as_ref().ok_or_else(|| {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not enabled")
    })
}

// =============================================================================
// Job Routes
// =============================================================================

/// GET /jobs - All registered jobs
async fn list_jobs(State(handle): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /jobs/{id}
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
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("No job {}", job_id)),
        Err(e) => internal_error(e),
    }
}

/// POST /jobs/{id}/trigger - Queue an on-demand run
async fn trigger_job(
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Job {} triggered via API", job_id);
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    job_id,
                    status: "queued".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /jobs/{id}/audit - Audit log of a job, newest first
async fn get_job_audit(
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
    Query(page): Query<PaginationQuery>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if !scheduler.job_exists(&job_id).await {
        return error_response(StatusCode::NOT_FOUND, format!("No job {}", job_id));
    }
    match scheduler.get_job_audit_log_by_job(&job_id, page.limit, page.offset) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e),
    }
}

// =============================================================================
// Run Log Routes
// =============================================================================

/// GET /runs?task=&status=&since=&until=&limit=
async fn get_runs(
    State(store): State<GuardedServerStore>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let status = match query.status.as_deref().map(RunStatus::parse) {
        None => None,
        Some(Some(status)) => Some(status),
        Some(None) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "status must be one of started, completed, failed",
            )
        }
    };
    let run_query = RunQuery {
        task: query.task,
        status,
        since: query.since,
        until: query.until,
        limit: query.limit,
    };
    match store.get_runs(&run_query) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /runs/stats?since=
async fn get_run_stats(
    State(store): State<GuardedServerStore>,
    Query(query): Query<StatsQuery>,
) -> Response {
    match store.get_run_stats(query.since) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /runs/failures?limit=
async fn get_recent_failures(
    State(store): State<GuardedServerStore>,
    Query(query): Query<FailuresQuery>,
) -> Response {
    match store.get_recent_failures(query.limit) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => internal_error(e),
    }
}

pub fn job_routes() -> Router<ServerState> {
    let jobs = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .route("/jobs/{id}/audit", get(get_job_audit));

    let runs = Router::new()
        .route("/runs", get(get_runs))
        .route("/runs/stats", get(get_run_stats))
        .route("/runs/failures", get(get_recent_failures));

    jobs.merge(runs)
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match self {
            JobError::NotFound => StatusCode::NOT_FOUND,
            JobError::AlreadyRunning | JobError::AlreadyQueued => StatusCode::CONFLICT,
            JobError::Cancelled | JobError::ExecutionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}
