//! Diagnostic tracing to an append-only file. The terminal belongs to the
//! child, so nothing here ever writes to stdout or stderr.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::level_filters::LevelFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Install the file subscriber. When `enabled` is false nothing is installed
/// and every call site reduces to a disabled-level check.
pub fn init_logging(enabled: bool, path: &Path) -> Result<()> {
    if !enabled {
        return Ok(());
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let _ = LOG_PATH.set(path.to_path_buf());
    let subscriber = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_max_level(LevelFilter::TRACE)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("a tracing subscriber is already installed")?;
    Ok(())
}

/// Path of the active log file, if logging was enabled.
pub fn log_file_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

pub fn log_debug(message: &str) {
    tracing::debug!("{message}");
}
