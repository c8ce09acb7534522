// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::jobs::RunnerConfig;

pub const DEFAULT_PORT: u16 = 8420;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Research dashboard server: runs `claude` research jobs and streams their progress.
#[derive(Debug, Clone, Parser)]
#[command(name = "research-dash", version, about)]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "RESEARCH_DASH_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "RESEARCH_DASH_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Working directory for research runs [default: ~/research]
    #[arg(long, env = "RESEARCH_DASH_CWD")]
    pub cwd: Option<PathBuf>,

    /// Path to the claude binary.
    #[arg(long, env = "RESEARCH_DASH_CLAUDE_PATH", default_value = "claude")]
    pub claude_path: PathBuf,

    /// Directory of frontend files served at `/`. Falls back to `./dist` when present.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    #[arg(long, env = "RESEARCH_DASH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Finished jobs older than this are dropped from memory.
    #[arg(long, default_value_t = 24)]
    pub retention_hours: u64,

    #[arg(long, default_value_t = 3600)]
    pub cleanup_interval_secs: u64,

    /// Poll interval of the live event stream.
    #[arg(long, default_value_t = 300)]
    pub stream_poll_ms: u64,

    /// How long a cancelled subprocess gets between SIGTERM and SIGKILL.
    #[arg(long, default_value_t = 10)]
    pub terminate_grace_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory; pass --cwd")]
    HomeDirNotFound,

    #[error("working directory does not exist: {0}")]
    CwdNotFound(PathBuf),

    #[error("working directory is not a directory: {0}")]
    CwdNotDir(PathBuf),
}

/// Resolved runtime settings shared by the routes and background tasks.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cwd: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub stream_poll: Duration,
    pub runner: RunnerConfig,
}

impl Settings {
    /// Defaults rooted at `cwd`. Used by tests and embedding callers.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            static_dir: None,
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            stream_poll: Duration::from_millis(300),
            runner: RunnerConfig::default(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Resolve defaults and check that the working directory is usable.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let cwd = match &self.cwd {
            Some(dir) => dir.clone(),
            None => research_dash_core::paths::default_research_dir()
                .ok_or(ConfigError::HomeDirNotFound)?,
        };
        if !cwd.exists() {
            return Err(ConfigError::CwdNotFound(cwd));
        }
        if !cwd.is_dir() {
            return Err(ConfigError::CwdNotDir(cwd));
        }

        Ok(Settings {
            cwd,
            static_dir: self.static_dir.clone().or_else(|| {
                let dist = PathBuf::from("dist");
                dist.exists().then_some(dist)
            }),
            retention: Duration::from_secs(self.retention_hours * 3600),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs.max(1)),
            stream_poll: Duration::from_millis(self.stream_poll_ms.max(1)),
            runner: RunnerConfig {
                claude_path: self.claude_path.clone(),
                terminate_grace: Duration::from_secs(self.terminate_grace_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("research-dash").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.port, 8420);
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:8420");
        assert_eq!(config.claude_path, PathBuf::from("claude"));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.stream_poll_ms, 300);
        assert_eq!(config.terminate_grace_secs, 10);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--host", "127.0.0.1", "--port", "9000", "--claude-path", "/opt/claude",
            "--log-format", "json",
        ]);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.claude_path, PathBuf::from("/opt/claude"));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_resolve_checks_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().to_str().unwrap();
        let settings = parse(&["--cwd", cwd, "--terminate-grace-secs", "3"]).resolve().unwrap();
        assert_eq!(settings.cwd, dir.path());
        assert_eq!(settings.runner.terminate_grace, Duration::from_secs(3));
        assert_eq!(settings.retention, Duration::from_secs(86_400));

        let missing = dir.path().join("nope");
        let err = parse(&["--cwd", missing.to_str().unwrap()]).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::CwdNotFound(_)));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = parse(&["--cwd", file.to_str().unwrap()]).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::CwdNotDir(_)));
    }
}
