//! Bulk export jobs
//!
//! - [`job`] - the export job and its lifecycle states
//! - [`controller`] - validate, submit, poll and download

pub mod controller;
pub mod job;

pub use controller::ExportJobController;
pub use job::{ExportJob, ExportJobState};
