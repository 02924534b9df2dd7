//! Changeset reconciliation
//!
//! - [`normalize`] - integer identifier column with a unique index
//! - [`reconciler`] - merges a changeset table into a mirror table

pub mod normalize;
pub mod reconciler;

pub use normalize::{identifier_index_name, normalize_identifier, NormalizeOutcome};
pub use reconciler::{PartitionedChanges, Reconciler, ReconciliationReport};
