//! Logging setup for chatrelay.
//!
//! Console output is always on. When a log file is configured, a second
//! plain-text layer appends to it, so restarts keep earlier runs.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{RelayError, Result};

/// Parse log level string to tracing Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` directives with the configured level added on top.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(parse_level(level).into())
}

/// Open `path` for appending, creating it and its parent directory.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global subscriber described by `config`.
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let file_layer = if config.file.is_empty() {
        None
    } else {
        let file = open_log_file(Path::new(&config.file))?;
        Some(
            fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true),
        )
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true).with_target(true))
        .with(file_layer)
        .with(build_filter(&config.level))
        .try_init()
        .map_err(|e| RelayError::Logging(e.to_string()))
}

/// Console-only logging, used when the log file cannot be opened.
///
/// A subscriber that is already installed is left in place.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true).with_target(true))
        .with(build_filter(level))
        .try_init();
}
