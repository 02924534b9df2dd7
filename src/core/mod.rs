//! Core business logic for geosync.
//!
//! # Modules
//!
//! - [`region`] - extent scoping of requests and downloads
//! - [`state`] - the watermark and its persistence
//! - [`export`] - remote bulk export jobs
//! - [`changeset`] - bounded-window changeset downloads
//! - [`reconcile`] - identifier normalization and changeset merging
//! - [`retention`] - bounded history of artifacts and changeset tables
//! - [`artifacts`] - artifact naming, checksums and readers
//! - [`sync`] - the coordinator tying a run together
//!
//! # Sync Workflow
//!
//! A full refresh submits an export, polls it, downloads the archive and
//! replaces the mirror table with its content. An incremental run downloads
//! the changes since the watermark, materializes them as a changeset table
//! and reconciles that table into the mirror. Both paths drop out-of-scope
//! rows before merging and advance the watermark only once the mirror (and
//! the optional target table) has been written.

pub mod artifacts;
pub mod changeset;
pub mod export;
pub mod reconcile;
pub mod region;
pub mod retention;
pub mod state;
pub mod sync;
