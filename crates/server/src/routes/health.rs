// crates/server/src/routes/health.rs
//! Liveness plus a snapshot of the job registry and the research directory.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::jobs::StatusCounts;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the research directory cannot be listed.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub jobs: StatusCounts,
    pub research_dir: String,
    pub research_dir_readable: bool,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cwd = &state.settings.cwd;
    let readable = match tokio::fs::read_dir(cwd).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(dir = %cwd.display(), error = %e, "research directory unreadable");
            false
        }
    };
    Json(HealthResponse {
        status: if readable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        jobs: state.store.status_counts(),
        research_dir: cwd.display().to_string(),
        research_dir_readable: readable,
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
