// Geosync - Geospatial layer mirror synchroniser
// Copyright (c) 2025 Geosync Contributors
// Licensed under the MIT License

//! # geosync - geospatial layer mirror synchroniser
//!
//! geosync keeps a local copy of a remote geospatial layer in step with its
//! upstream data service. The first sync requests a bulk export; every later
//! run downloads only the features changed since the last one and merges
//! them into the mirror table.
//!
//! ## Architecture
//!
//! - [`cli`] - command-line interface and argument parsing
//! - [`core`] - region scoping, export jobs, changesets, reconciliation,
//!   watermarks, retention and the sync coordinator
//! - [`adapters`] - the data service client and the feature stores
//! - [`domain`] - identifiers, the feature model and errors
//! - [`config`] - settings and per-dataset configuration
//! - [`logging`] - structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geosync::config::load_settings;
//! use geosync::core::sync::{SyncAction, SyncContext, SyncCoordinator};
//! use geosync::domain::DatasetName;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = load_settings("geosync.toml")?;
//!     let ctx = SyncContext::from_settings(&settings, DatasetName::new("nz-roads")?)?;
//!     let coordinator = SyncCoordinator::new(ctx);
//!
//!     coordinator.execute(SyncAction::FullExport).await?;
//!     let summary = coordinator.execute(SyncAction::Changeset).await?;
//!     println!("{:?}", summary.mirror);
//!     Ok(())
//! }
//! ```
//!
//! ## Incremental Sync
//!
//! The watermark in `last_updated.json` marks how far the mirror is
//! synchronized. It only moves forward, and only after the mirror has been
//! written:
//!
//! ```rust,no_run
//! use geosync::core::state::{Watermark, WatermarkStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = WatermarkStore::new("/srv/geosync/nz-roads");
//! let current = store.require().await?;
//! store.advance(Watermark::now()).await?;
//! # let _ = current;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every library call returns [`domain::Result`], with [`domain::SyncError`]
//! carrying the failure class and its process exit code.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
