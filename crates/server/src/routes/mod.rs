// crates/server/src/routes/mod.rs
//! API route handlers for the research dashboard server.

pub mod files;
pub mod health;
pub mod metrics;
pub mod research;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET    /health - Health check
/// - GET    /metrics - Prometheus metrics
/// - POST   /research - Submit a research job
/// - GET    /research - Active jobs and past runs
/// - GET    /research/{id} - Job detail with events
/// - DELETE /research/{id} - Cancel a job
/// - GET    /research/{id}/stream - SSE stream of job events
/// - GET    /research/{id}/report - Job report as text
/// - GET    /research/{id}/files - Job output listing
/// - GET    /research/{id}/files/{*path} - One output file
/// - GET    /research/past/{dir}/report - Past-run report
/// - GET    /research/past/{dir}/files - Past-run listing
/// - GET    /research/past/{dir}/files/{*path} - One past-run file
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(research::router())
        .merge(stream::router())
        .merge(files::router())
        .with_state(state)
}
