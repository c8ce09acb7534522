// crates/server/src/lib.rs
//! Research dashboard server library.
//!
//! Runs `claude` research jobs as subprocesses, records their streamed events
//! and serves the job API, live SSE streams and the produced report files.

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError, LogFormat, Settings};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - the research API, health and metrics routes
/// - the dashboard's static files as a fallback, when a static dir is configured
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let static_dir = state.settings.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = api_routes(state);
    if let Some(dir) = static_dir {
        tracing::info!(dir = %dir.display(), "serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::Router;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::jobs::{JobLauncher, JobRecord, JobStore};
    use crate::{create_app, AppState, Settings};

    /// Accepts jobs without running them.
    pub struct IdleLauncher;

    impl JobLauncher for IdleLauncher {
        fn launch(&self, _job: Arc<JobRecord>) {}
    }

    pub fn test_state(dir: &TempDir) -> Arc<AppState> {
        let shutdown = CancellationToken::new();
        let store = Arc::new(JobStore::new(shutdown.clone()));
        AppState::with_launcher(Settings::new(dir.path()), store, Arc::new(IdleLauncher), shutdown)
    }

    pub fn test_app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(&dir));
        (app, dir)
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::test_support::{test_app, test_state};

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let (app, _dir) = test_app();
        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert_eq!(json["jobs"]["pending"], 0);
        assert_eq!(json["research_dir_readable"], true);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _dir) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    #[tokio::test]
    async fn test_404_for_unknown_route() {
        let (app, _dir) = test_app();
        let (status, _body) = get(app, "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_dir_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<h1>dash</h1>").unwrap();

        let base = test_state(&dir);
        let mut settings = Settings::new(dir.path());
        settings.static_dir = Some(static_dir.path().to_path_buf());
        let state = AppState::with_launcher(
            settings,
            Arc::clone(&base.store),
            Arc::clone(&base.launcher),
            base.shutdown.clone(),
        );
        let app = create_app(state);

        let (status, body) = get(app.clone(), "/index.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>dash</h1>");

        // API routes still win over the fallback.
        let (status, _) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}
