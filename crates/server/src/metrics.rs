//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions for the job lifecycle and live streams
//! - Helper functions for recording metrics

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use research_dash_core::{JobStatus, ModelName};

use crate::jobs::StatusCounts;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before anything is recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("research_jobs_submitted_total", "Research jobs accepted, by model");
    describe_counter!(
        "research_jobs_finished_total",
        "Research jobs that reached a terminal status, by status"
    );
    describe_histogram!(
        "research_job_duration_seconds",
        "Wall time from runner start to terminal status"
    );
    describe_counter!("research_events_parsed_total", "Events parsed from subprocess output");
    describe_gauge!("research_stream_clients", "Connected live-stream clients");
    describe_gauge!("research_jobs", "Registered jobs, by status");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted(model: ModelName) {
    counter!("research_jobs_submitted_total", "model" => model.as_str()).increment(1);
}

pub fn record_job_finished(status: JobStatus, duration: Duration) {
    counter!("research_jobs_finished_total", "status" => status.as_str()).increment(1);
    histogram!("research_job_duration_seconds", "status" => status.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_events_parsed(count: usize) {
    counter!("research_events_parsed_total").increment(count as u64);
}

/// Set the per-status job gauges from a registry snapshot.
pub fn record_job_counts(counts: StatusCounts) {
    for (status, count) in [
        (JobStatus::Pending, counts.pending),
        (JobStatus::Running, counts.running),
        (JobStatus::Completed, counts.completed),
        (JobStatus::Failed, counts.failed),
        (JobStatus::Cancelled, counts.cancelled),
    ] {
        gauge!("research_jobs", "status" => status.as_str()).set(count as f64);
    }
}

/// Counts a live-stream client for as long as it is alive.
pub struct StreamClientGuard(());

impl StreamClientGuard {
    pub fn connect() -> Self {
        gauge!("research_stream_clients").increment(1.0);
        Self(())
    }
}

impl Drop for StreamClientGuard {
    fn drop(&mut self) {
        gauge!("research_stream_clients").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_job_submitted(ModelName::Haiku);
        record_job_finished(JobStatus::Completed, Duration::from_millis(5));
        record_events_parsed(3);
        record_job_counts(StatusCounts::default());
        drop(StreamClientGuard::connect());
    }

    #[test]
    fn test_init_then_render() {
        init_metrics();
        record_job_submitted(ModelName::Opus);
        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("research_jobs_submitted_total"));
    }
}
