//! Logging configuration using tracing
//!
//! All diagnostics go to a daily-rolling log file; stdout stays reserved
//! for the binary's NDJSON event stream. The `FORETRACK_LOG` environment
//! variable overrides the default filter.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "FORETRACK_LOG";

/// Default filter: info for every workspace crate, warn for everything else.
const DEFAULT_FILTER: &str =
    "foretrack=info,foretrack_core=info,foretrack_transport=info,foretrack_detect=info,warn";

const LOG_FILE_PREFIX: &str = "foretrack.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/foretrack/logs/`, one file per day.
///
/// # Examples
/// ```bash
/// FORETRACK_LOG=debug foretrack --agent device-agent
/// FORETRACK_LOG=foretrack_transport=trace foretrack --connect 127.0.0.1:7878
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Foretrack starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Directory the rolling appender writes into.
pub fn log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("foretrack").join("logs")
}
