// crates/server/src/jobs/mod.rs
//! Research job lifecycle.
//!
//! - `JobRecord`: one job's status, event log and results
//! - `JobStore`: registry of jobs and claimed output directories
//! - `Runner`: drives a job through a `claude` subprocess

pub mod lines;
pub mod record;
pub mod runner;
pub mod store;

pub use record::{JobRecord, TransitionError};
pub use runner::{JobLauncher, Runner, RunnerConfig, PROMPT_PRELUDE};
pub use store::{past_runs, JobStore, StatusCounts};
