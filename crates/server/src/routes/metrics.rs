// crates/server/src/routes/metrics.rs
//! `GET /metrics` in Prometheus text format.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::{record_job_counts, render_metrics};
use crate::state::AppState;

/// Refreshes the per-status job gauges, then renders. 503 until the recorder is installed.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    record_job_counts(state.store.status_counts());
    let Some(output) = render_metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
        .into_response()
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}
