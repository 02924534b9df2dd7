//! Domain models and types for geosync.
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`LayerId`], [`ExportJobId`], [`DatasetName`])
//! - **Row model** ([`Feature`], [`FieldValue`], [`TableSchema`])
//! - **Change tagging** ([`ChangeKind`])
//! - **Error types** ([`SyncError`]) and the [`Result`] alias
//!
//! ```rust
//! use geosync::domain::{LayerId, SyncError, Result};
//!
//! fn parse_layer(raw: &str) -> Result<LayerId> {
//!     raw.parse().map_err(SyncError::Usage)
//! }
//! # assert!(parse_layer("50772").is_ok());
//! ```

pub mod change;
pub mod errors;
pub mod feature;
pub mod geometry;
pub mod ids;
pub mod result;

// Re-export commonly used types for convenience
pub use change::{ChangeKind, CHANGE_TAG_COLUMN};
pub use errors::SyncError;
pub use feature::{Column, Feature, FieldType, FieldValue, TableSchema};
pub use ids::{DatasetName, ExportJobId, LayerId};
pub use result::Result;
