//! Subscriber setup for the hub process
//!
//! File output always goes through a non-blocking rolling appender. Text mode
//! mirrors events to stdout; JSON mode writes the file only.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Transport internals that flood `debug` with per-frame noise
const QUIET_TARGETS: &[&str] = &["hyper=info", "tungstenite=info", "tokio_tungstenite=info"];

/// File rotation named by the `rotation` config key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    /// Unknown values mean a single unrotated file
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "daily" => LogRotation::Daily,
            _ => LogRotation::Never,
        }
    }

    fn rotation(self) -> Rotation {
        match self {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Filter for a configured level
///
/// A bare level (`debug`) also quiets the transport crates; anything with a
/// directive (`peer_hub=trace,axum=debug`) is taken verbatim.
pub fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level = level.trim();
    let directives = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        let mut parts = vec![level.to_string()];
        parts.extend(QUIET_TARGETS.iter().map(|t| t.to_string()));
        parts.join(",")
    };
    EnvFilter::try_new(&directives).with_context(|| format!("Invalid log level: {level}"))
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `log_level`. The returned guard flushes the file
/// writer on drop and must live as long as the process.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let rotation = LogRotation::parse(&config.rotation);
    let appender = RollingFileAppender::builder()
        .rotation(rotation.rotation())
        .filename_prefix(&config.log_file)
        .build(&config.log_dir)
        .with_context(|| format!("Failed to open log directory {}", config.log_dir))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.log_level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    installed.context("Global tracing subscriber already set")?;

    Ok(guard)
}
