//! Logging and observability
//!
//! Structured logging through `tracing`: console output for operators and a
//! rotating JSON log inside each dataset's `logs/` directory.

pub mod structured;

pub use structured::{init_logging, LoggingGuard, LOG_FILE_NAME};

/// Log an error with context
///
/// ```no_run
/// use geosync::log_error_with_context;
/// use geosync::domain::SyncError;
///
/// let error = SyncError::Transport("connection reset".to_string());
/// log_error_with_context!(&error, "Changeset download failed");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

/// Log a finished artifact download
///
/// ```no_run
/// use geosync::log_artifact_written;
/// use std::path::Path;
///
/// log_artifact_written!(Path::new("full/layer_1.zip"), 2048u64, "ab12...");
/// ```
#[macro_export]
macro_rules! log_artifact_written {
    ($path:expr, $bytes:expr, $sha256:expr) => {
        tracing::info!(
            path = %$path.display(),
            bytes = $bytes,
            sha256 = %$sha256,
            "Artifact written"
        );
    };
}
