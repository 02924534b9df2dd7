//! Sync orchestration
//!
//! - [`action`] - the closed set of things a run can do
//! - [`context`] - collaborators built once per invocation
//! - [`coordinator`] - dispatches an action and keeps the watermark honest
//! - [`summary`] - what a run did
//!
//! # Example
//!
//! ```rust,no_run
//! use geosync::config::load_settings;
//! use geosync::core::sync::{SyncAction, SyncContext, SyncCoordinator};
//! use geosync::domain::DatasetName;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = load_settings("geosync.toml")?;
//! let ctx = SyncContext::from_settings(&settings, DatasetName::new("roads")?)?;
//!
//! let summary = SyncCoordinator::new(ctx).execute(SyncAction::Changeset).await?;
//! println!("watermark now {:?}", summary.watermark);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod context;
pub mod coordinator;
pub mod summary;

pub use action::SyncAction;
pub use context::{SyncContext, DEFAULT_EXTENT_TABLE};
pub use coordinator::SyncCoordinator;
pub use summary::SyncSummary;
