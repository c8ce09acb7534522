// crates/server/src/jobs/runner.rs
//! Drives one research job through a `claude` subprocess.
//!
//! The runner owns the child process: it streams stdout through the parser
//! into the job record, honours cancellation with SIGTERM and a grace period,
//! adopts the output directory the run created, and sets the terminal status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use research_dash_core::env::{filtered_env, EnvSource, ProcessEnv};
use research_dash_core::paths::is_research_dir_name;
use research_dash_core::{
    parse_stream_line, EventCounter, EventPayload, JobStatus, ResultStats,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::lines::{BoundedLines, MAX_LINE_BYTES};
use super::record::JobRecord;
use super::store::JobStore;
use crate::error::RunnerError;
use crate::metrics;

/// Orchestration instructions placed before every research question.
pub const PROMPT_PRELUDE: &str = include_str!("prompt.md");

/// How long to keep reading pipes after the process exits.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on retained stderr; the remainder is read and discarded.
const STDERR_LIMIT: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub claude_path: PathBuf,
    /// Time between SIGTERM and SIGKILL on cancellation.
    pub terminate_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            claude_path: PathBuf::from("claude"),
            terminate_grace: Duration::from_secs(10),
        }
    }
}

/// Starts jobs in the background. The API only sees this seam.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, job: Arc<JobRecord>);
}

/// Runs jobs as `claude -p ... --output-format stream-json` subprocesses.
#[derive(Clone)]
pub struct Runner {
    config: Arc<RunnerConfig>,
    store: Arc<JobStore>,
    env: Arc<dyn EnvSource + Send + Sync>,
}

impl Runner {
    pub fn new(config: RunnerConfig, store: Arc<JobStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Replace the environment the child inherits from.
    pub fn with_env(mut self, env: impl EnvSource + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    fn command(&self, job: &JobRecord) -> Command {
        let prompt = format!("{PROMPT_PRELUDE}{}", job.query());
        let mut cmd = Command::new(&self.config.claude_path);
        cmd.args([
            "-p",
            "--dangerously-skip-permissions",
            "--verbose",
            "--output-format",
            "stream-json",
            "--model",
            job.model().as_str(),
            "--max-turns",
        ])
        .arg(job.max_turns().to_string())
        .arg(prompt)
        .current_dir(job.cwd())
        .env_clear()
        .envs(filtered_env(self.env.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }

    /// Run `job` to a terminal status.
    ///
    /// Errors are returned only for failures to start the process; the job is
    /// marked failed before they are returned.
    pub async fn run(&self, job: Arc<JobRecord>) -> Result<(), RunnerError> {
        let job_id = job.id().to_string();
        if let Err(refused) = job.transition(JobStatus::Running) {
            tracing::info!(job_id = %job_id, status = %refused.from, "job no longer pending, not starting");
            return Ok(());
        }
        let started = Instant::now();
        let cwd = job.cwd().to_path_buf();

        let pre = research_dirs(&cwd).await;
        tracing::debug!(job_id = %job_id, count = pre.len(), "pre-run directory snapshot");

        let mut child = match self.command(&job).spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = RunnerError::Spawn {
                    path: self.config.claude_path.display().to_string(),
                    source,
                };
                tracing::error!(job_id = %job_id, error = %err, "failed to spawn claude");
                fail(&job, err.to_string(), started);
                return Err(err);
            }
        };
        let pid = child.id();
        tracing::info!(
            job_id = %job_id,
            pid,
            model = %job.model(),
            max_turns = job.max_turns(),
            cwd = %cwd.display(),
            "subprocess started"
        );

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            let err = RunnerError::MissingPipe("stdout/stderr");
            fail(&job, err.to_string(), started);
            return Err(err);
        };
        let mut stderr_task = tokio::spawn(collect_stderr(stderr));

        let mut lines = BoundedLines::new(stdout, MAX_LINE_BYTES);
        let counter = EventCounter::new();
        let mut scan = ScanState::default();

        let cancel = job.cancel_token().clone();
        let grace = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(grace);
        let mut terminating = false;
        let mut killed = false;
        let mut stdout_open = true;

        let wait_result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !terminating => {
                    terminating = true;
                    tracing::info!(job_id = %job_id, pid, "cancellation requested, sending SIGTERM");
                    if !send_sigterm(pid) {
                        grace.as_mut().reset(tokio::time::Instant::now());
                    } else {
                        grace.as_mut().reset(tokio::time::Instant::now() + self.config.terminate_grace);
                    }
                }
                _ = &mut grace, if terminating && !killed => {
                    killed = true;
                    tracing::warn!(job_id = %job_id, pid, "subprocess still alive after grace period, killing");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(job_id = %job_id, error = %e, "failed to kill subprocess");
                    }
                }
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => ingest(&job, &line, &counter, &mut scan),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "error reading stdout");
                        stdout_open = false;
                    }
                },
                status = child.wait() => break status,
            }
        };

        if stdout_open {
            let drain = async {
                while let Ok(Some(line)) = lines.next_line().await {
                    ingest(&job, &line, &counter, &mut scan);
                }
            };
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::warn!(job_id = %job_id, "stdout still open after exit, giving up");
            }
        }
        if lines.skipped() > 0 {
            tracing::warn!(job_id = %job_id, skipped = lines.skipped(), "stdout lines dropped");
        }

        let exit_code = match &wait_result {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "failed to wait for subprocess");
                -1
            }
        };
        let stderr_text = match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut stderr_task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "stderr collector failed");
                String::new()
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, "stderr still open after exit, giving up");
                stderr_task.abort();
                String::new()
            }
        };

        if job.status() == JobStatus::Cancelled {
            tracing::info!(job_id = %job_id, exit_code, "job cancelled");
            metrics::record_job_finished(JobStatus::Cancelled, started.elapsed());
            return Ok(());
        }

        let post = research_dirs(&cwd).await;
        tracing::debug!(job_id = %job_id, count = post.len(), "post-run directory snapshot");
        match claim_new_output_dir(&pre, &post, &self.store) {
            Some(dir) => {
                tracing::info!(job_id = %job_id, dir = %dir.display(), "claimed output directory");
                job.set_output_dir(dir);
            }
            None => tracing::debug!(job_id = %job_id, "no new output directory"),
        }

        // The CLI may exit non-zero (e.g. 2 on max turns) after a successful result.
        let succeeded = exit_code == 0 || (scan.got_result && !scan.result_is_error);
        let outcome = if succeeded {
            job.finish(JobStatus::Completed, None)
        } else {
            let message = match stderr_text.trim() {
                "" => format!("subprocess exited with code {exit_code}"),
                text => text.to_string(),
            };
            tracing::error!(job_id = %job_id, exit_code, error = %message, "job failed");
            job.finish(JobStatus::Failed, Some(message))
        };

        match outcome {
            Ok(_) => {
                let status = job.status();
                tracing::info!(
                    job_id = %job_id,
                    %status,
                    exit_code,
                    events = job.event_count(),
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "job finished"
                );
                metrics::record_job_finished(status, started.elapsed());
            }
            Err(refused) => {
                tracing::info!(job_id = %job_id, status = %refused.from, "job settled before runner finished");
            }
        }
        Ok(())
    }
}

impl JobLauncher for Runner {
    fn launch(&self, job: Arc<JobRecord>) {
        let runner = self.clone();
        tokio::spawn(async move {
            let job_id = job.id().to_string();
            if let Err(e) = runner.run(job).await {
                tracing::error!(job_id = %job_id, error = %e, "job runner error");
            }
        });
    }
}

/// What the scan has seen that decides the final status.
#[derive(Debug, Default)]
struct ScanState {
    got_result: bool,
    result_is_error: bool,
}

/// Parse one stdout line into the job's log, capturing session and result metadata.
fn ingest(job: &JobRecord, line: &str, counter: &EventCounter, scan: &mut ScanState) {
    let events = parse_stream_line(line, counter);
    if events.is_empty() {
        return;
    }
    metrics::record_events_parsed(events.len());

    for event in events {
        match &event.payload {
            EventPayload::System { raw, .. } => {
                let session_id = raw
                    .get("session_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty());
                if let Some(sid) = session_id {
                    if job.set_session_id_if_absent(sid) {
                        tracing::debug!(job_id = %job.id(), session_id = sid, "captured session id");
                    }
                }
            }
            EventPayload::Result { is_error, raw, .. } => {
                scan.got_result = true;
                scan.result_is_error = *is_error;
                tracing::debug!(job_id = %job.id(), is_error, "received result event");
                job.set_result_info(ResultStats::from_result_payload(raw));
            }
            _ => {}
        }
        job.add_event(event);
    }
}

fn fail(job: &JobRecord, message: String, started: Instant) {
    if job.finish(JobStatus::Failed, Some(message)).is_ok() {
        metrics::record_job_finished(JobStatus::Failed, started.elapsed());
    }
}

async fn collect_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = (&mut stderr).take(STDERR_LIMIT).read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "error reading stderr");
    }
    // Keep the pipe drained so the child never blocks on a full buffer.
    let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(errno) => {
            tracing::warn!(pid, %errno, "failed to send SIGTERM");
            false
        }
    }
}

/// No graceful signal off Unix; the caller kills immediately.
#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) -> bool {
    false
}

type DirSnapshot = HashMap<PathBuf, SystemTime>;

/// Research directories under `dir` with their modification times.
async fn research_dirs(dir: &Path) -> DirSnapshot {
    let mut out = DirSnapshot::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_research = entry
            .file_name()
            .to_str()
            .is_some_and(is_research_dir_name);
        if !is_research {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        out.insert(entry.path(), mtime);
    }
    out
}

/// Claim the newest directory present after the run but not before.
///
/// Candidates already claimed by another job are skipped.
fn claim_new_output_dir(pre: &DirSnapshot, post: &DirSnapshot, store: &JobStore) -> Option<PathBuf> {
    let mut candidates: Vec<(&PathBuf, &SystemTime)> = post
        .iter()
        .filter(|(path, _)| !pre.contains_key(*path))
        .collect();
    candidates.sort_by(|(a_path, a_time), (b_path, b_time)| {
        b_time.cmp(a_time).then_with(|| a_path.cmp(b_path))
    });
    candidates
        .into_iter()
        .map(|(path, _)| path)
        .find(|path| store.claim_dir(path))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use research_dash_core::env::StaticEnv;
    use research_dash_core::ModelName;
    use std::ffi::OsStr;
    use tokio_util::sync::CancellationToken;

    fn job(cwd: &Path) -> Arc<JobRecord> {
        Arc::new(JobRecord::new(
            "job-1",
            "compare tokio and smol",
            ModelName::Haiku,
            7,
            cwd,
            CancellationToken::new(),
        ))
    }

    fn store() -> Arc<JobStore> {
        Arc::new(JobStore::new(CancellationToken::new()))
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_command_arguments_and_env() {
        let runner = Runner::new(
            RunnerConfig {
                claude_path: PathBuf::from("/opt/bin/claude"),
                ..RunnerConfig::default()
            },
            store(),
        )
        .with_env(StaticEnv::new([
            ("PATH", "/usr/bin"),
            ("CLAUDECODE", "1"),
            ("MAX_API_KEY", "max"),
        ]));
        let job = job(Path::new("/tmp/research"));
        let cmd = runner.command(&job);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), OsStr::new("/opt/bin/claude"));
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/tmp/research")));
        let args: Vec<&OsStr> = std_cmd.get_args().collect();
        assert_eq!(
            &args[..9],
            &[
                "-p",
                "--dangerously-skip-permissions",
                "--verbose",
                "--output-format",
                "stream-json",
                "--model",
                "haiku",
                "--max-turns",
                "7",
            ]
            .map(OsStr::new)
        );
        let prompt = args[9].to_str().unwrap();
        assert!(prompt.starts_with(PROMPT_PRELUDE));
        assert!(prompt.ends_with("compare tokio and smol"));

        let envs: HashMap<&OsStr, Option<&OsStr>> = std_cmd.get_envs().collect();
        assert_eq!(envs.get(OsStr::new("PATH")), Some(&Some(OsStr::new("/usr/bin"))));
        assert_eq!(
            envs.get(OsStr::new("ANTHROPIC_API_KEY")),
            Some(&Some(OsStr::new("max")))
        );
        assert!(!envs.contains_key(OsStr::new("CLAUDECODE")));
        assert!(!envs.contains_key(OsStr::new("MAX_API_KEY")));
    }

    #[test]
    fn test_ingest_captures_first_session_and_result_stats() {
        let job = job(Path::new("/tmp"));
        let counter = EventCounter::new();
        let mut scan = ScanState::default();

        ingest(&job, r#"{"type":"system","subtype":"init","session_id":"s-1"}"#, &counter, &mut scan);
        ingest(&job, r#"{"type":"system","session_id":"s-2"}"#, &counter, &mut scan);
        ingest(&job, r#"{"type":"stream_event","event":{"type":"ping"}}"#, &counter, &mut scan);
        ingest(
            &job,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#,
            &counter,
            &mut scan,
        );
        assert!(!scan.got_result);
        ingest(
            &job,
            r#"{"type":"result","result":"ok","is_error":false,"total_cost_usd":0.3,"num_turns":2}"#,
            &counter,
            &mut scan,
        );

        assert_eq!(job.session_id().as_deref(), Some("s-1"));
        assert!(scan.got_result);
        assert!(!scan.result_is_error);
        assert_eq!(job.result_info().cost_usd, Some(0.3));
        assert_eq!(job.result_info().num_turns, Some(2));
        let indices: Vec<usize> = job.events_since(0).iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(job.num_turns(), 1);
    }

    #[test]
    fn test_claim_prefers_newest_new_dir() {
        let store = store();
        let pre = DirSnapshot::from([(PathBuf::from("/r/research-old"), at(10))]);
        let post = DirSnapshot::from([
            (PathBuf::from("/r/research-old"), at(500)),
            (PathBuf::from("/r/research-a"), at(100)),
            (PathBuf::from("/r/research-b"), at(200)),
        ]);
        assert_eq!(
            claim_new_output_dir(&pre, &post, &store),
            Some(PathBuf::from("/r/research-b"))
        );
    }

    #[test]
    fn test_claim_falls_through_to_next_unclaimed() {
        let store = store();
        assert!(store.claim_dir(Path::new("/r/research-b")));
        let post = DirSnapshot::from([
            (PathBuf::from("/r/research-a"), at(100)),
            (PathBuf::from("/r/research-b"), at(200)),
        ]);
        assert_eq!(
            claim_new_output_dir(&DirSnapshot::new(), &post, &store),
            Some(PathBuf::from("/r/research-a"))
        );
        // Everything now claimed.
        assert_eq!(claim_new_output_dir(&DirSnapshot::new(), &post, &store), None);
    }

    #[test]
    fn test_claim_with_no_new_dirs() {
        let store = store();
        let snapshot = DirSnapshot::from([(PathBuf::from("/r/research-a"), at(1))]);
        assert_eq!(claim_new_output_dir(&snapshot, &snapshot, &store), None);
    }

    #[tokio::test]
    async fn test_research_dirs_only_lists_prefixed_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("research-x")).unwrap();
        std::fs::create_dir(root.path().join("other")).unwrap();
        std::fs::write(root.path().join("research-file"), "").unwrap();

        let dirs = research_dirs(root.path()).await;
        let keys: Vec<&PathBuf> = dirs.keys().collect();
        assert_eq!(keys, vec![&root.path().join("research-x")]);
        assert!(research_dirs(&root.path().join("missing")).await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            RunnerConfig {
                claude_path: dir.path().join("no-such-claude"),
                ..RunnerConfig::default()
            },
            store(),
        );
        let job = job(dir.path());
        let err = runner.run(Arc::clone(&job)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("no-such-claude"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            RunnerConfig {
                claude_path: dir.path().join("no-such-claude"),
                ..RunnerConfig::default()
            },
            store(),
        );
        let job = job(dir.path());
        assert!(job.request_cancel());
        runner.run(Arc::clone(&job)).await.unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.error().is_none());
    }

    #[tokio::test]
    async fn test_collect_stderr_caps_output() {
        let big = vec![b'e'; (STDERR_LIMIT as usize) + 100];
        let text = collect_stderr(&big[..]).await;
        assert_eq!(text.len(), STDERR_LIMIT as usize);
    }
}
