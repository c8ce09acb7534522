// crates/core/src/types.rs
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::event::StreamEvent;

/// Required name prefix for research output directories.
pub const RESEARCH_DIR_PREFIX: &str = "research-";

/// Report artifact that marks a research directory as finished.
pub const REPORT_FILE: &str = "report.md";

/// Subdirectory holding downloaded sources inside a research directory.
pub const SOURCES_DIR: &str = "sources";

/// Index file listing the sources, relative to [`SOURCES_DIR`].
pub const SOURCE_INDEX_FILE: &str = "index.md";

pub const DEFAULT_MAX_TURNS: i64 = 100;

// ============================================================================
// Job status
// ============================================================================

/// Lifecycle state of a research job.
///
/// Status only moves forward: `pending → running → {completed|failed|cancelled}`.
/// `pending` may also jump straight to a terminal state (cancelled before start,
/// or failed to spawn).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Whether `self → next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Model
// ============================================================================

/// Supported Claude model tiers. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    Opus,
    Sonnet,
    Haiku,
}

impl ModelName {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelName::Opus => "opus",
            ModelName::Sonnet => "sonnet",
            ModelName::Haiku => "haiku",
        }
    }
}

impl FromStr for ModelName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opus" => Ok(ModelName::Opus),
            "sonnet" => Ok(ModelName::Sonnet),
            "haiku" => Ok(ModelName::Haiku),
            other => Err(ValidationError::InvalidModel(other.to_string())),
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Submission
// ============================================================================

fn default_model() -> String {
    ModelName::Opus.as_str().to_string()
}

fn default_max_turns() -> i64 {
    DEFAULT_MAX_TURNS
}

/// Body of `POST /research`. Omitted fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: i64,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub query: String,
    pub model: ModelName,
    pub max_turns: u32,
    pub cwd: Option<PathBuf>,
}

impl ResearchRequest {
    /// Check query, model and turn budget, in that order.
    pub fn validate(self) -> Result<ValidatedRequest, ValidationError> {
        if self.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let model: ModelName = self.model.parse()?;
        if self.max_turns <= 0 {
            return Err(ValidationError::NonPositiveMaxTurns);
        }
        let max_turns = u32::try_from(self.max_turns)
            .map_err(|_| ValidationError::MaxTurnsTooLarge { max: u32::MAX })?;
        Ok(ValidatedRequest {
            query: self.query,
            model,
            max_turns,
            cwd: self.cwd,
        })
    }
}

// ============================================================================
// Result statistics
// ============================================================================

/// Cost and timing figures reported by the CLI's final `result` line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_api_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Map<String, Value>>,
}

fn as_int(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

impl ResultStats {
    /// Extract statistics from a decoded `result` payload.
    ///
    /// `total_cost_usd` wins over `cost_usd` whenever the key is present.
    pub fn from_result_payload(raw: &Map<String, Value>) -> Self {
        let cost_usd = match raw.get("total_cost_usd") {
            Some(v) => v.as_f64(),
            None => raw.get("cost_usd").and_then(Value::as_f64),
        };
        Self {
            cost_usd,
            duration_ms: raw.get("duration_ms").and_then(as_int),
            duration_api_ms: raw.get("duration_api_ms").and_then(as_int),
            num_turns: raw.get("num_turns").and_then(as_int),
            session_id: raw
                .get("session_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from),
            usage: raw
                .get("usage")
                .and_then(Value::as_object)
                .filter(|m| !m.is_empty())
                .cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cost_usd.is_none()
            && self.duration_ms.is_none()
            && self.duration_api_ms.is_none()
            && self.num_turns.is_none()
            && self.session_id.is_none()
            && self.usage.is_none()
    }
}

// ============================================================================
// External views
// ============================================================================

/// Summary of one job as returned by submit, list and cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub query: String,
    pub model: ModelName,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    pub output_lines: usize,
    pub num_turns: usize,
    pub max_turns: u32,
}

/// Full job view including the event log.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub events: Vec<StreamEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_info: Option<ResultStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A research directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastRun {
    pub dir: String,
    pub name: String,
    pub has_report: bool,
}

/// Response of `GET /research`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobList {
    pub active: Vec<JobSummary>,
    pub past: Vec<PastRun>,
}

/// Coarse classification of an artifact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Md,
    Html,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

/// Listing of a research directory's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListResponse {
    pub dir_name: String,
    pub files: Vec<FileEntry>,
    pub sources: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_index: Option<String>,
}

impl FileListResponse {
    pub fn empty(dir_name: impl Into<String>) -> Self {
        Self {
            dir_name: dir_name.into(),
            files: Vec::new(),
            sources: Vec::new(),
            source_index: None,
        }
    }
}
