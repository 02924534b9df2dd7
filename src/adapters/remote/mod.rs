//! Remote data service adapter
//!
//! - [`api`] - the export and changeset seams used by the sync core
//! - [`client`] - reqwest implementation
//! - [`models`] - request/response bodies

pub mod api;
pub mod client;
pub mod models;

pub use api::{ChangesetApi, ChangesetQuery, ExportApi};
pub use client::RemoteClient;
pub use models::{ExportRequest, ExportStatus, RemoteState, SubmittedExport, ValidationResponse};
