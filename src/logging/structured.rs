//! Structured logging setup using tracing
//!
//! Human-readable console output plus an optional JSON file log with
//! rotation. Span close events are emitted so every instrumented step logs
//! its own duration.

use crate::config::LoggingConfig;
use crate::domain::{Result, SyncError};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// File name prefix of the JSON log
pub const LOG_FILE_NAME: &str = "geosync.log";

/// Guard that must be kept alive for the duration of the program
/// to ensure logs are flushed properly
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the logging system
///
/// `log_dir` is where the JSON file log goes; it is ignored when file
/// logging is disabled or `None` is passed.
///
/// ```no_run
/// use geosync::config::LoggingConfig;
/// use geosync::logging::init_logging;
///
/// let _guard = init_logging("info", &LoggingConfig::default(), None)
///     .expect("Failed to initialize logging");
/// tracing::info!("Application started");
/// ```
pub fn init_logging(
    log_level_str: &str,
    config: &LoggingConfig,
    log_dir: Option<&Path>,
) -> Result<LoggingGuard> {
    let log_level = parse_log_level(log_level_str)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("geosync={}", log_level)));

    let mut layers = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter.clone());

    layers.push(console_layer.boxed());

    let file_guard = match log_dir {
        Some(dir) if config.local_enabled => {
            let rotation = match config.local_rotation.as_str() {
                "hourly" => Rotation::HOURLY,
                "never" => Rotation::NEVER,
                _ => Rotation::DAILY,
            };

            std::fs::create_dir_all(dir).map_err(|e| {
                SyncError::Configuration(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

            let file_appender = RollingFileAppender::new(rotation, dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(non_blocking)
                .with_filter(env_filter);

            layers.push(file_layer.boxed());
            Some(guard)
        }
        _ => None,
    };

    tracing_subscriber::registry().with(layers).init();

    tracing::debug!(
        file_logging = file_guard.is_some(),
        log_dir = ?log_dir,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Parse log level from string
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SyncError::Configuration(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            level_str
        ))),
    }
}
