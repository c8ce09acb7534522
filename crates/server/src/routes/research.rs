// crates/server/src/routes/research.rs
//! Research job endpoints.
//!
//! - `POST   /research`              - submit a job (201)
//! - `GET    /research`              - active jobs and past runs
//! - `GET    /research/{id}`         - job detail with its event log
//! - `DELETE /research/{id}`         - cancel a job
//! - `GET    /research/{id}/report`  - the job's `report.md`

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use research_dash_core::{JobDetail, JobList, JobSummary, ResearchRequest};

use super::files::{job_output_dir, report_response};
use crate::error::{ApiError, ApiResult};
use crate::jobs::{past_runs, JobRecord};
use crate::metrics::record_job_submitted;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/research", get(list_research).post(submit_research))
        .route("/research/{id}", get(get_research).delete(cancel_research))
        .route("/research/{id}/report", get(get_report))
}

fn lookup(state: &AppState, id: &str) -> ApiResult<Arc<JobRecord>> {
    state
        .store
        .get(id)
        .ok_or_else(|| ApiError::JobNotFound(id.to_string()))
}

fn sweep_expired(state: &AppState) {
    let removed = state.store.cleanup_expired(state.settings.retention);
    if removed > 0 {
        tracing::info!(removed, "removed expired jobs");
    }
}

/// POST /research - validate, register and start a job.
async fn submit_research(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobSummary>)> {
    let Json(request) = payload.map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))?;
    let request = request.validate()?;

    sweep_expired(&state);

    let job = state.store.create(request, &state.settings.cwd);
    tracing::info!(
        job_id = %job.id(),
        model = %job.model(),
        max_turns = job.max_turns(),
        cwd = %job.cwd().display(),
        "research job submitted"
    );
    record_job_submitted(job.model());
    state.launcher.launch(Arc::clone(&job));

    Ok((StatusCode::CREATED, Json(job.summary())))
}

/// GET /research
async fn list_research(State(state): State<Arc<AppState>>) -> Json<JobList> {
    sweep_expired(&state);
    Json(JobList {
        active: state.store.list(),
        past: past_runs(&state.settings.cwd).await,
    })
}

/// GET /research/{id}
async fn get_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobDetail>> {
    Ok(Json(lookup(&state, &id)?.detail()))
}

/// DELETE /research/{id} - request cancellation. Terminal jobs are left as they are.
async fn cancel_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    let job = lookup(&state, &id)?;
    if job.request_cancel() {
        tracing::info!(job_id = %id, "cancellation requested");
    } else {
        tracing::debug!(job_id = %id, status = %job.status(), "cancel ignored for finished job");
    }
    Ok(Json(job.summary()))
}

/// GET /research/{id}/report
async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (_, dir) = job_output_dir(&state, &id)?;
    report_response(&dir).await
}
