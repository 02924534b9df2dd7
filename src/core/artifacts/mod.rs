//! On-disk artifacts: naming, checksums and readers

pub mod archive;
pub mod checksum;
pub mod naming;

pub use archive::{read_export_archive, read_feature_collection};
pub use checksum::{checksum_bytes, checksum_file};
pub use naming::{
    changeset_file_path, changeset_table_name, changeset_table_timestamp, export_archive_path,
    CHANGESET_DIR, FULL_DIR, LOG_DIR,
};

use std::path::PathBuf;

/// A file written by a download, with its size and digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}
