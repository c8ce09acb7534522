// crates/server/src/error.rs
use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use research_dash_core::{PathError, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} has no output directory")]
    NoOutputDir(String),

    #[error("Report not found")]
    ReportNotFound,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid path: {0}")]
    Path(#[from] PathError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::debug!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("job not found", format!("Job ID: {id}")),
                )
            }
            ApiError::NoOutputDir(id) => {
                tracing::debug!(job_id = %id, "Job has no output directory");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new("no output directory"),
                )
            }
            ApiError::ReportNotFound => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("report not found"),
            ),
            ApiError::FileNotFound(path) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("file not found", path.clone()),
            ),
            ApiError::InvalidBody(msg) => {
                tracing::warn!(message = %msg, "Invalid request body");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("invalid request body", msg.clone()),
                )
            }
            ApiError::Validation(err) => {
                tracing::warn!(error = %err, "Rejected research request");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(err.to_string()))
            }
            ApiError::Path(err) => {
                tracing::warn!(error = %err, "Rejected path");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("invalid path", err.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Reasons the runner could not drive a job to completion.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("subprocess {0} was not captured")]
    MissingPipe(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    /// Helper to extract status code and body from a response
    async fn extract_response(response: Response) -> (StatusCode, ErrorResponse) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error_response: ErrorResponse = serde_json::from_slice(&body).unwrap();
        (status, error_response)
    }

    #[tokio::test]
    async fn test_job_not_found_returns_404() {
        let (status, body) = extract_response(ApiError::JobNotFound("abc123".into()).into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "job not found");
        assert!(body.details.unwrap().contains("abc123"));
    }

    #[tokio::test]
    async fn test_missing_output_and_report_return_404() {
        let (status, body) = extract_response(ApiError::NoOutputDir("j".into()).into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "no output directory");

        let (status, body) = extract_response(ApiError::ReportNotFound.into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "report not found");
    }

    #[tokio::test]
    async fn test_validation_error_returns_400_with_message() {
        let (status, body) =
            extract_response(ApiError::from(ValidationError::EmptyQuery).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "query is required");
        assert!(body.details.is_none());
    }

    #[tokio::test]
    async fn test_path_error_returns_400() {
        let (status, body) =
            extract_response(ApiError::from(PathError::ParentTraversal).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "invalid path");
        assert!(body.details.unwrap().contains(".."));
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, body) = extract_response(ApiError::Internal("disk on fire".into()).into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
    }

    #[test]
    fn test_error_response_serialization() {
        let json = serde_json::to_string(&ErrorResponse::new("Test error")).unwrap();
        assert_eq!(json, r#"{"error":"Test error"}"#);

        let json = serde_json::to_string(&ErrorResponse::with_details("Test error", "More info")).unwrap();
        assert!(json.contains("\"details\":\"More info\""));
    }

    #[test]
    fn test_runner_error_display() {
        let err = RunnerError::Spawn {
            path: "/opt/claude".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            err.to_string(),
            "failed to start /opt/claude: No such file or directory"
        );
        assert_eq!(
            RunnerError::MissingPipe("stdout").to_string(),
            "subprocess stdout was not captured"
        );
    }
}
