//! Checksums of downloaded artifacts
//!
//! Every archive and changeset response is hashed once written, and the
//! digest is logged next to its path so a later run can tell whether the
//! file on disk is the one that was downloaded.

use crate::domain::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 of raw bytes
///
/// ```
/// use geosync::core::artifacts::checksum::checksum_bytes;
///
/// let checksum = checksum_bytes(b"abc");
/// assert_eq!(checksum.len(), 64);
/// ```
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, read in chunks
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
