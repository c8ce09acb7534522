// crates/server/src/jobs/store.rs
//! In-memory registry of research jobs plus the output-directory claim ledger.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use research_dash_core::paths::is_research_dir_name;
use research_dash_core::{JobStatus, JobSummary, PastRun, ValidatedRequest, REPORT_FILE};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::record::JobRecord;

/// Number of registered jobs in each status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Thread-safe job registry.
///
/// The job map and the claim set have separate locks; neither is held across `.await`.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<JobRecord>>>,
    claimed_dirs: Mutex<HashSet<PathBuf>>,
    /// Parent of every job's cancellation token.
    shutdown: CancellationToken,
}

impl JobStore {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            claimed_dirs: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Register a new pending job. `default_cwd` applies when the request names none.
    pub fn create(&self, req: ValidatedRequest, default_cwd: &Path) -> Arc<JobRecord> {
        let id = Uuid::new_v4().to_string();
        let cwd = req.cwd.unwrap_or_else(|| default_cwd.to_path_buf());
        let job = Arc::new(JobRecord::new(
            id.clone(),
            req.query,
            req.model,
            req.max_turns,
            cwd,
            self.shutdown.child_token(),
        ));
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id, Arc::clone(&job));
            }
            Err(e) => tracing::error!("RwLock poisoned writing jobs map: {e}"),
        }
        job
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobRecord>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    /// Summaries of every job, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let jobs: Vec<Arc<JobRecord>> = match self.jobs.read() {
            Ok(jobs) => jobs.values().cloned().collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                Vec::new()
            }
        };
        let mut keyed: Vec<_> = jobs
            .iter()
            .map(|job| (job.created_at(), job.summary()))
            .collect();
        keyed.sort_by(|(a_at, a), (b_at, b)| b_at.cmp(a_at).then_with(|| a.id.cmp(&b.id)));
        keyed.into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn delete(&self, id: &str) -> Option<Arc<JobRecord>> {
        match self.jobs.write() {
            Ok(mut jobs) => jobs.remove(id),
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        let jobs = match self.jobs.read() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                return counts;
            }
        };
        for job in jobs.values() {
            let slot = match job.status() {
                JobStatus::Pending => &mut counts.pending,
                JobStatus::Running => &mut counts.running,
                JobStatus::Completed => &mut counts.completed,
                JobStatus::Failed => &mut counts.failed,
                JobStatus::Cancelled => &mut counts.cancelled,
            };
            *slot += 1;
        }
        counts
    }

    /// Drop terminal jobs older than `max_age`. Pending and running jobs always stay.
    pub fn cleanup_expired(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut jobs = match self.jobs.write() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                return 0;
            }
        };
        let before = jobs.len();
        jobs.retain(|_, job| {
            let expired = (now - job.created_at())
                .to_std()
                .map(|age| age > max_age)
                .unwrap_or(false);
            !(expired && job.status().is_terminal())
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::info!(removed, remaining = jobs.len(), "expired jobs removed");
        }
        removed
    }

    /// Atomically take ownership of `dir`. False when another job already holds it.
    pub fn claim_dir(&self, dir: &Path) -> bool {
        match self.claimed_dirs.lock() {
            Ok(mut claimed) => claimed.insert(dir.to_path_buf()),
            Err(e) => {
                tracing::error!("Mutex poisoned claiming dir: {e}");
                false
            }
        }
    }

    pub fn release_dir(&self, dir: &Path) {
        match self.claimed_dirs.lock() {
            Ok(mut claimed) => {
                claimed.remove(dir);
            }
            Err(e) => tracing::error!("Mutex poisoned releasing dir: {e}"),
        }
    }
}

/// Research directories directly under `root`, sorted by name descending.
///
/// Unreadable roots yield an empty list.
pub async fn past_runs(root: &Path) -> Vec<PastRun> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(root = %root.display(), error = %e, "cannot read research root");
            return Vec::new();
        }
    };

    let mut runs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "error scanning research root");
                break;
            }
        };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_research_dir_name(&name) {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_dir() => {}
            _ => continue,
        }
        let dir = entry.path();
        let has_report = tokio::fs::metadata(dir.join(REPORT_FILE)).await.is_ok();
        runs.push(PastRun {
            dir: dir.to_string_lossy().into_owned(),
            name,
            has_report,
        });
    }

    runs.sort_by(|a, b| b.name.cmp(&a.name));
    runs
}
