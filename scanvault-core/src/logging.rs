//! Logging configuration with rotation support
//!
//! # Example
//!
//! ```rust,no_run
//! use scanvault_core::logging::init_logging;
//!
//! init_logging("logs", "scanvault.log", "info").unwrap();
//! ```

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize logging with daily file rotation.
///
/// - `directory`: directory to store logs
/// - `filename_prefix`: prefix for log files (e.g. "scanvault.log")
/// - `level`: default log level (e.g. "info", "debug")
///
/// `RUST_LOG` overrides `level` when set. Console output goes to stderr so
/// CLI progress lines on stdout stay clean.
pub fn init_logging(
    directory: impl AsRef<Path>,
    filename_prefix: &str,
    level: &str,
) -> Result<()> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename_prefix)
        .build(directory.as_ref())
        .map_err(|e| Error::Config(format!("failed to create log appender: {e}")))?;

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init tracing: {e}")))?;

    Ok(())
}
