// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::jobs::{JobLauncher, JobStore, Runner};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Registry of research jobs.
    pub store: Arc<JobStore>,
    /// Starts submitted jobs in the background.
    pub launcher: Arc<dyn JobLauncher>,
    pub settings: Settings,
    /// Server lifetime. Cancelled on shutdown; ends every live stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Production state: jobs run as `claude` subprocesses.
    pub fn new(settings: Settings, shutdown: CancellationToken) -> Arc<Self> {
        let store = Arc::new(JobStore::new(shutdown.clone()));
        let runner = Runner::new(settings.runner.clone(), Arc::clone(&store));
        Self::with_launcher(settings, store, Arc::new(runner), shutdown)
    }

    /// State with a caller-supplied launcher (tests use one that never spawns).
    pub fn with_launcher(
        settings: Settings,
        store: Arc<JobStore>,
        launcher: Arc<dyn JobLauncher>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            store,
            launcher,
            settings,
            shutdown,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
