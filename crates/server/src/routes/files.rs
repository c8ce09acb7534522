// crates/server/src/routes/files.rs
//! Research output artifacts: reports, file listings and individual files.
//!
//! - `GET /research/{id}/files`                  - listing of a job's output directory
//! - `GET /research/{id}/files/{*path}`          - one file from it
//! - `GET /research/past/{dir}/report`           - a past run's `report.md`
//! - `GET /research/past/{dir}/files`            - listing of a past run
//! - `GET /research/past/{dir}/files/{*path}`    - one file from a past run

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as UrlPath, Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use research_dash_core::paths::{classify_file_type, resolve_safe_file, validate_dir_name};
use research_dash_core::{FileEntry, FileListResponse, REPORT_FILE, SOURCES_DIR, SOURCE_INDEX_FILE};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{ApiError, ApiResult};
use crate::jobs::JobRecord;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/research/{id}/files", get(list_job_files))
        .route("/research/{id}/files/{*path}", get(get_job_file))
        .route("/research/past/{dir}/report", get(get_past_report))
        .route("/research/past/{dir}/files", get(list_past_files))
        .route("/research/past/{dir}/files/{*path}", get(get_past_file))
}

/// Look up a job and the output directory it claimed.
pub(crate) fn job_output_dir(state: &AppState, id: &str) -> ApiResult<(Arc<JobRecord>, PathBuf)> {
    let job = state
        .store
        .get(id)
        .ok_or_else(|| ApiError::JobNotFound(id.to_string()))?;
    let dir = job
        .output_dir()
        .ok_or_else(|| ApiError::NoOutputDir(id.to_string()))?;
    Ok((job, dir))
}

/// `report.md` from `dir` as plain text.
pub(crate) async fn report_response(dir: &Path) -> ApiResult<Response> {
    let report = dir.join(REPORT_FILE);
    let bytes = tokio::fs::read(&report).await.map_err(|e| {
        tracing::debug!(path = %report.display(), error = %e, "report unreadable");
        ApiError::ReportNotFound
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], bytes).into_response())
}

/// Files directly inside `dir` and inside its `sources/` subdirectory.
///
/// An unreadable `dir` yields an empty listing.
pub(crate) async fn list_dir_files(dir: &Path, dir_name: &str) -> FileListResponse {
    let mut resp = FileListResponse::empty(dir_name);
    let Some(files) = file_entries(dir, None).await else {
        return resp;
    };
    resp.files = files;

    let sources = dir.join(SOURCES_DIR);
    resp.sources = file_entries(&sources, Some(SOURCES_DIR)).await.unwrap_or_default();
    resp.source_index = tokio::fs::read_to_string(sources.join(SOURCE_INDEX_FILE))
        .await
        .ok();
    resp
}

/// Regular files in `dir`, sorted by name. `None` if `dir` cannot be read.
async fn file_entries(dir: &Path, prefix: Option<&str>) -> Option<Vec<FileEntry>> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut out = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let path = match prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.clone(),
        };
        out.push(FileEntry {
            file_type: classify_file_type(&name),
            name,
            path,
            size: meta.len(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Some(out)
}

/// Serve `rel` from inside `base`, refusing anything that escapes it.
pub(crate) async fn serve_file(base: &Path, rel: &str, request: Request) -> ApiResult<Response> {
    let resolved = resolve_safe_file(base, rel)?;
    let is_file = tokio::fs::metadata(&resolved)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::FileNotFound(rel.to_string()));
    }
    let response = ServeFile::new(&resolved)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(format!("serving {}: {e}", resolved.display())))?;
    Ok(response.map(Body::new))
}

/// Directory of a past run under the configured working directory.
fn past_dir(state: &AppState, dir: &str) -> ApiResult<PathBuf> {
    validate_dir_name(dir)?;
    Ok(state.settings.cwd.join(dir))
}

/// GET /research/{id}/files
async fn list_job_files(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<FileListResponse>> {
    let (_, dir) = job_output_dir(&state, &id)?;
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(list_dir_files(&dir, &dir_name).await))
}

/// GET /research/{id}/files/{*path}
async fn get_job_file(
    State(state): State<Arc<AppState>>,
    UrlPath((id, path)): UrlPath<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let (_, dir) = job_output_dir(&state, &id)?;
    serve_file(&dir, &path, request).await
}

/// GET /research/past/{dir}/report
async fn get_past_report(
    State(state): State<Arc<AppState>>,
    UrlPath(dir): UrlPath<String>,
) -> ApiResult<Response> {
    let base = past_dir(&state, &dir)?;
    report_response(&base).await
}

/// GET /research/past/{dir}/files
async fn list_past_files(
    State(state): State<Arc<AppState>>,
    UrlPath(dir): UrlPath<String>,
) -> ApiResult<Json<FileListResponse>> {
    let base = past_dir(&state, &dir)?;
    Ok(Json(list_dir_files(&base, &dir).await))
}

/// GET /research/past/{dir}/files/{*path}
async fn get_past_file(
    State(state): State<Arc<AppState>>,
    UrlPath((dir, path)): UrlPath<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let base = past_dir(&state, &dir)?;
    serve_file(&base, &path, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use research_dash_core::FileType;

    #[tokio::test]
    async fn test_list_dir_files_splits_sources_and_reads_index() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("research-x");
        std::fs::create_dir_all(dir.join("sources/nested")).unwrap();
        std::fs::write(dir.join("report.md"), "# Report").unwrap();
        std::fs::write(dir.join("chart.html"), "<p>").unwrap();
        std::fs::write(dir.join("sources/01-a.md"), "a").unwrap();
        std::fs::write(dir.join("sources/index.md"), "1. a").unwrap();

        let resp = list_dir_files(&dir, "research-x").await;
        assert_eq!(resp.dir_name, "research-x");
        assert_eq!(
            resp.files,
            vec![
                FileEntry {
                    name: "chart.html".into(),
                    path: "chart.html".into(),
                    size: 3,
                    file_type: FileType::Html,
                },
                FileEntry {
                    name: "report.md".into(),
                    path: "report.md".into(),
                    size: 8,
                    file_type: FileType::Md,
                },
            ]
        );
        let source_paths: Vec<&str> = resp.sources.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(source_paths, vec!["sources/01-a.md", "sources/index.md"]);
        assert_eq!(resp.source_index.as_deref(), Some("1. a"));
    }

    #[tokio::test]
    async fn test_list_dir_files_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let resp = list_dir_files(&root.path().join("research-gone"), "research-gone").await;
        assert_eq!(resp, FileListResponse::empty("research-gone"));
    }

    #[tokio::test]
    async fn test_list_dir_files_without_sources() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("report.md"), "r").unwrap();
        let resp = list_dir_files(root.path(), "research-y").await;
        assert_eq!(resp.files.len(), 1);
        assert!(resp.sources.is_empty());
        assert!(resp.source_index.is_none());
    }
}
