//! Domain error types
//!
//! This module defines the error hierarchy for geosync. All errors are
//! domain-specific and don't expose third-party types.

use thiserror::Error;

/// Main geosync error type
///
/// Every fallible operation in the library returns this type. The variants
/// follow the failure classes of a sync run: bad input, remote rejection,
/// transport failures, poll deadlines, schema problems and local storage.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad or contradictory command-line input
    #[error("Usage error: {0}")]
    Usage(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote export API rejected the request parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-2xx response, malformed body or network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Polling exceeded the maximum wait; the job can be resumed later
    #[error("Export job {job_id} did not complete in time; resume with --resume {job_id}")]
    Timeout { job_id: String },

    /// Identifier field absent or not numeric
    #[error("Schema error: {0}")]
    Schema(String),

    /// Feature store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Watermark or layer state errors
    #[error("State management error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Process exit code for this error
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 2 | usage or configuration |
    /// | 3 | remote validation |
    /// | 4 | transport |
    /// | 5 | fatal (storage, I/O, state, ...) |
    /// | 6 | poll timeout |
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Usage(_) | SyncError::Configuration(_) => 2,
            SyncError::Validation(_) => 3,
            SyncError::Transport(_) => 4,
            SyncError::Timeout { .. } => 6,
            _ => 5,
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::Serialization(format!("TOML serialization error: {err}"))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}
