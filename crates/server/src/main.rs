// crates/server/src/main.rs
//! Research dashboard server binary.
//!
//! Binds the HTTP API, sweeps expired jobs on an interval and shuts down
//! gracefully on SIGINT/SIGTERM, asking running research subprocesses to stop.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use research_dash_server::jobs::JobStore;
use research_dash_server::{create_app, init_metrics, AppState, Config, LogFormat};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,research_dash_server=info,research_dash_core=info";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Remove expired jobs every `interval` until `shutdown` fires.
async fn run_cleanup_loop(
    store: std::sync::Arc<JobStore>,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // First tick is immediate; the API sweeps on demand anyway.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = store.cleanup_expired(retention);
                if removed > 0 {
                    tracing::info!(removed, remaining = store.len(), "periodic cleanup removed expired jobs");
                } else {
                    tracing::debug!(remaining = store.len(), "periodic cleanup: nothing expired");
                }
            }
        }
    }
    tracing::debug!("cleanup loop stopped");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);
    init_metrics();

    let settings = config.resolve().context("invalid configuration")?;
    let addr = config.bind_addr();
    let shutdown = CancellationToken::new();

    let state = AppState::new(settings, shutdown.clone());
    let cleanup = tokio::spawn(run_cleanup_loop(
        std::sync::Arc::clone(&state.store),
        state.settings.retention,
        state.settings.cleanup_interval,
        shutdown.clone(),
    ));

    tracing::info!(
        cwd = %state.settings.cwd.display(),
        claude = %state.settings.runner.claude_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "starting research dashboard"
    );
    let app = create_app(std::sync::Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends live streams so connections can drain, and signals every running job.
            signal_token.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(5), cleanup).await.is_err() {
        tracing::warn!("cleanup loop did not stop in time");
    }
    tracing::info!(jobs = state.store.len(), "graceful shutdown complete");
    Ok(())
}
