// crates/server/src/jobs/record.rs
//! Per-job state shared between the runner, the API and live streams.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use research_dash_core::{
    JobDetail, JobStatus, JobSummary, ModelName, ResultStats, StreamEvent,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A refused status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Mutable part of a job, guarded by one lock.
#[derive(Debug)]
struct JobInner {
    status: JobStatus,
    created_at: DateTime<Utc>,
    events: Vec<StreamEvent>,
    output_dir: Option<PathBuf>,
    error: Option<String>,
    session_id: Option<String>,
    result_info: ResultStats,
}

/// One research job.
///
/// Identity fields are immutable; everything else sits behind a `std::sync::RwLock`
/// that is only held to copy or mutate in-memory state, never across `.await`.
#[derive(Debug)]
pub struct JobRecord {
    id: String,
    query: String,
    model: ModelName,
    max_turns: u32,
    cwd: PathBuf,
    cancel: CancellationToken,
    inner: RwLock<JobInner>,
}

impl JobRecord {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        model: ModelName,
        max_turns: u32,
        cwd: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            model,
            max_turns,
            cwd: cwd.into(),
            cancel,
            inner: RwLock::new(JobInner {
                status: JobStatus::Pending,
                created_at: Utc::now(),
                events: Vec::new(),
                output_dir: None,
                error: None,
                session_id: None,
                result_info: ResultStats::default(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobInner> {
        self.inner.read().unwrap_or_else(|e| {
            tracing::error!(job_id = %self.id, "job lock poisoned on read: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobInner> {
        self.inner.write().unwrap_or_else(|e| {
            tracing::error!(job_id = %self.id, "job lock poisoned on write: {e}");
            e.into_inner()
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn model(&self) -> ModelName {
        self.model
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Token the runner watches; cancelled on user cancel or server shutdown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.read().created_at
    }

    /// Backdate or move the creation time.
    pub fn set_created_at(&self, at: DateTime<Utc>) {
        self.write().created_at = at;
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        self.read().output_dir.clone()
    }

    pub fn set_output_dir(&self, dir: impl Into<PathBuf>) {
        self.write().output_dir = Some(dir.into());
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    pub fn set_error(&self, msg: impl Into<String>) {
        self.write().error = Some(msg.into());
    }

    pub fn session_id(&self) -> Option<String> {
        self.read().session_id.clone()
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        self.write().session_id = Some(id.into());
    }

    /// Record `id` unless a session id is already known. Returns whether it was stored.
    pub fn set_session_id_if_absent(&self, id: &str) -> bool {
        let mut inner = self.write();
        if inner.session_id.is_some() {
            return false;
        }
        inner.session_id = Some(id.to_string());
        true
    }

    pub fn result_info(&self) -> ResultStats {
        self.read().result_info.clone()
    }

    pub fn set_result_info(&self, stats: ResultStats) {
        self.write().result_info = stats;
    }

    /// Move status forward. Backward moves and moves out of a terminal state are refused.
    pub fn transition(&self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        let mut inner = self.write();
        let from = inner.status;
        if !from.can_transition_to(next) {
            return Err(TransitionError { from, to: next });
        }
        inner.status = next;
        Ok(from)
    }

    /// Terminal transition that records an error message in the same critical section.
    pub fn finish(&self, next: JobStatus, error: Option<String>) -> Result<JobStatus, TransitionError> {
        let mut inner = self.write();
        let from = inner.status;
        if !next.is_terminal() || !from.can_transition_to(next) {
            return Err(TransitionError { from, to: next });
        }
        inner.status = next;
        if error.is_some() {
            inner.error = error;
        }
        Ok(from)
    }

    /// Mark the job cancelled and signal the runner. No-op on a terminal job.
    pub fn request_cancel(&self) -> bool {
        let cancelled = self.transition(JobStatus::Cancelled).is_ok();
        if cancelled {
            self.cancel.cancel();
        }
        cancelled
    }

    pub fn add_event(&self, event: StreamEvent) {
        self.write().events.push(event);
    }

    /// Copy of every event at or after `cursor`. Negative cursors start at 0.
    pub fn events_since(&self, cursor: i64) -> Vec<StreamEvent> {
        let inner = self.read();
        let start = usize::try_from(cursor.max(0)).unwrap_or(usize::MAX);
        inner.events.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.read().events.len()
    }

    /// Completed assistant text blocks.
    pub fn num_turns(&self) -> usize {
        count_turns(&self.read().events)
    }

    pub fn summary(&self) -> JobSummary {
        let inner = self.read();
        self.summary_locked(&inner)
    }

    pub fn detail(&self) -> JobDetail {
        let inner = self.read();
        JobDetail {
            summary: self.summary_locked(&inner),
            events: inner.events.clone(),
            session_id: inner.session_id.clone().filter(|s| !s.is_empty()),
            result_info: (!inner.result_info.is_empty()).then(|| inner.result_info.clone()),
            error: inner.error.clone().filter(|e| !e.is_empty()),
        }
    }

    fn summary_locked(&self, inner: &JobInner) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            query: self.query.clone(),
            model: self.model,
            status: inner.status,
            created_at: inner.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            output_dir: inner
                .output_dir
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned()),
            output_lines: inner.events.len(),
            num_turns: count_turns(&inner.events),
            max_turns: self.max_turns,
        }
    }
}

fn count_turns(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_assistant_text()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use research_dash_core::{AssistantBlock, EventPayload, UserBlock};
    use serde_json::json;

    fn job() -> JobRecord {
        JobRecord::new(
            "job-1",
            "what is tokio",
            ModelName::Sonnet,
            25,
            "/tmp/research",
            CancellationToken::new(),
        )
    }

    fn text(index: usize, t: &str) -> StreamEvent {
        StreamEvent::new(index, EventPayload::Assistant(AssistantBlock::Text(t.into())))
    }

    #[test]
    fn test_new_job_is_pending_and_empty() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.event_count(), 0);
        assert_eq!(job.num_turns(), 0);
        assert!(job.output_dir().is_none());
    }

    #[test]
    fn test_status_never_regresses() {
        let job = job();
        assert_eq!(job.transition(JobStatus::Running), Ok(JobStatus::Pending));
        assert_eq!(
            job.transition(JobStatus::Pending),
            Err(TransitionError {
                from: JobStatus::Running,
                to: JobStatus::Pending
            })
        );
        assert!(job.finish(JobStatus::Failed, Some("boom".into())).is_ok());
        assert_eq!(job.error().as_deref(), Some("boom"));
        assert!(job.finish(JobStatus::Completed, None).is_err());
        assert!(!job.request_cancel());
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(!job.cancel_token().is_cancelled());
    }

    #[test]
    fn test_finish_rejects_non_terminal_target() {
        let job = job();
        assert!(job.finish(JobStatus::Running, None).is_err());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn test_request_cancel_fires_token() {
        let job = job();
        job.transition(JobStatus::Running).unwrap();
        assert!(job.request_cancel());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.cancel_token().is_cancelled());
    }

    #[test]
    fn test_events_since_clamps_cursor() {
        let job = job();
        for i in 0..3 {
            job.add_event(text(i, "x"));
        }
        assert_eq!(job.events_since(-5).len(), 3);
        assert_eq!(job.events_since(0).len(), 3);
        assert_eq!(job.events_since(2)[0].index, 2);
        assert!(job.events_since(3).is_empty());
        assert!(job.events_since(100).is_empty());
    }

    #[test]
    fn test_num_turns_counts_assistant_text_only() {
        let job = job();
        job.add_event(text(0, "a"));
        job.add_event(StreamEvent::new(
            1,
            EventPayload::Assistant(AssistantBlock::TextDelta("partial".into())),
        ));
        job.add_event(StreamEvent::new(
            2,
            EventPayload::User(UserBlock::ToolResult {
                content: "r".into(),
                is_error: false,
            }),
        ));
        job.add_event(text(3, "b"));
        assert_eq!(job.num_turns(), 2);
        assert_eq!(job.summary().output_lines, 4);
    }

    #[test]
    fn test_session_id_first_capture_wins() {
        let job = job();
        assert!(job.set_session_id_if_absent("s-1"));
        assert!(!job.set_session_id_if_absent("s-2"));
        assert_eq!(job.session_id().as_deref(), Some("s-1"));
    }

    #[test]
    fn test_summary_serialization_omits_unset_output_dir() {
        let job = job();
        job.set_created_at("2026-03-01T10:20:30.123Z".parse().unwrap());
        let json = serde_json::to_value(job.summary()).unwrap();
        assert_eq!(
            json,
            json!({
                "id": "job-1",
                "query": "what is tokio",
                "model": "sonnet",
                "status": "pending",
                "created_at": "2026-03-01T10:20:30Z",
                "output_lines": 0,
                "num_turns": 0,
                "max_turns": 25
            })
        );
    }

    #[test]
    fn test_detail_presents_empty_events_and_omits_unset_fields() {
        let job = job();
        let json = serde_json::to_value(job.detail()).unwrap();
        assert_eq!(json["events"], json!([]));
        for key in ["session_id", "result_info", "error", "output_dir"] {
            assert!(json.get(key).is_none(), "{key} should be omitted");
        }

        job.set_output_dir("/tmp/research/research-tokio");
        job.set_session_id("sess");
        job.set_result_info(ResultStats {
            cost_usd: Some(0.5),
            ..ResultStats::default()
        });
        job.add_event(text(0, "hello"));
        let json = serde_json::to_value(job.detail()).unwrap();
        assert_eq!(json["output_dir"], json!("/tmp/research/research-tokio"));
        assert_eq!(json["session_id"], json!("sess"));
        assert_eq!(json["result_info"], json!({"cost_usd": 0.5}));
        assert_eq!(
            json["events"],
            json!([{"index": 0, "type": "assistant", "subtype": "text", "text": "hello"}])
        );
    }
}
