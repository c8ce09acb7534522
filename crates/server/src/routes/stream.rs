// crates/server/src/routes/stream.rs
//! Live event stream for one research job.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;

use crate::error::{ApiError, ApiResult};
use crate::metrics::StreamClientGuard;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/research/{id}/stream", get(stream_research))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Index of the first event to send. Kept as text so junk values fall back to 0.
    after: Option<String>,
}

fn start_cursor(after: Option<&str>) -> i64 {
    after
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0)
}

/// GET /research/{id}/stream?after=N
///
/// # Events
///
/// | Event name | When emitted                                        |
/// |------------|-----------------------------------------------------|
/// | (message)  | Each job event, in index order                      |
/// | `done`     | Job reached a terminal status; the stream then ends |
///
/// The `done` payload is `{"status", "output_dir"}` with `output_dir` empty
/// when the job claimed no directory. Server shutdown or a client disconnect
/// ends the stream without a `done` event.
pub async fn stream_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<StreamQuery>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    let mut cursor = start_cursor(params.after.as_deref());
    let shutdown = state.shutdown.clone();
    let poll = state.settings.stream_poll;
    tracing::debug!(job_id = %id, cursor, "stream client connected");

    let stream = async_stream::stream! {
        let _client = StreamClientGuard::connect();
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Read status before events so a terminal status implies a complete log.
            let status = job.status();
            for event in job.events_since(cursor) {
                cursor += 1;
                match serde_json::to_string(&event) {
                    Ok(data) => yield Ok(Event::default().data(data)),
                    Err(e) => tracing::warn!(job_id = %id, index = event.index, error = %e, "failed to encode event"),
                }
            }

            if status.is_terminal() {
                let output_dir = job
                    .output_dir()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                let data = serde_json::json!({
                    "status": status,
                    "output_dir": output_dir,
                });
                yield Ok(Event::default().event("done").data(data.to_string()));
                tracing::debug!(job_id = %id, %status, "stream finished");
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
