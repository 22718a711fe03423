//! Shared logging utilities for RMCP binaries.
//!
//! Logs go to a daily-rolling file under the RMCP home directory plus
//! stderr. Standard output is never touched: the stdio transport owns it
//! exclusively for JSON-RPC responses.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "rmcp=info,rmcp_server=info,rmcp_worker=info";
const DEBUG_LOG_FILTER: &str =
    "rmcp=debug,rmcp_server=debug,rmcp_worker=debug,rmcp_vfs=debug,rmcp_approval=debug";
const MAX_LOG_FILES: usize = 5;

/// Logging configuration shared by RMCP binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// `--debug`: lower the stderr filter to debug for all rmcp crates.
    pub debug: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.app_name)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&log_dir)
        .context("Failed to initialize rolling log writer")?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.debug {
        EnvFilter::new(DEBUG_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(guard)
}

/// Get the logs directory: `{rmcp home}/logs`.
///
/// Home resolution is owned by `rmcp_config` so the path has a single
/// source of truth across the binaries.
pub fn logs_dir() -> PathBuf {
    rmcp_config::rmcp_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    std::fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logs_dir_follows_rmcp_home() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("RMCP_HOME", temp.path());

        let logs = ensure_logs_dir().unwrap();
        assert!(logs.starts_with(temp.path()));
        assert!(logs.ends_with("logs"));
        assert!(logs.is_dir());

        std::env::remove_var("RMCP_HOME");
    }
}
