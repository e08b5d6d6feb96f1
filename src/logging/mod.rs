//! Structured logging for assetscan
//!
//! Human-readable output goes to stderr (stdout carries command results) and
//! JSON lines go to a daily rotating file under the platform data directory.

pub mod macros;

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "assetscan.log";

/// Initialize the logging system
///
/// Logs are written to `<data dir>/assetscan/logs/assetscan.log.YYYY-MM-DD`.
/// `RUST_LOG` controls the level (default `info`). Calling this again after a
/// subscriber is installed is not an error.
pub fn init_logging() -> Result<PathBuf> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log filter")?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(anyhow!("Failed to install log subscriber: {}", e));
    }

    tracing::debug!("Logging initialized. Log directory: {}", log_dir.display());

    Ok(log_dir)
}

/// `ASSETSCAN_LOG_DIR`, else `<data dir>/assetscan/logs`
fn get_log_directory() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("ASSETSCAN_LOG_DIR")
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir.trim()));
    }

    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .ok_or_else(|| anyhow!("Could not find a data directory for logs"))?;
    Ok(base.join("assetscan").join("logs"))
}

/// Path of today's log file
pub fn get_current_log_file() -> Result<PathBuf> {
    let log_dir = get_log_directory()?;
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    Ok(log_dir.join(format!("{}.{}", LOG_FILE_PREFIX, today)))
}
