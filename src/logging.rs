//! File-based logging.
//!
//! The terminal belongs to the UI, so tracing output goes to a daily-rotated
//! file instead of stdout.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "music-board";
const DEFAULT_FILTER: &str = "music_board=debug,warn";

/// Initialize the global subscriber.
///
/// Logs land in `<log_dir>/music-board.YYYY-MM-DD`. `RUST_LOG` takes
/// precedence over `filter`, which takes precedence over the built-in default.
/// The returned guard flushes buffered lines on drop; keep it alive until the
/// process exits.
pub fn init_logging(log_dir: &Path, filter: Option<&str>) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::info!(dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}
