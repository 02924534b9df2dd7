//! Watermark persistence
//!
//! The watermark lives in `last_updated.json` inside the dataset directory.
//! Writes go through a temporary file and a rename so a crash never leaves a
//! truncated watermark behind.

use super::watermark::Watermark;
use crate::domain::{Result, SyncError};
use std::path::{Path, PathBuf};

/// File name of the persisted watermark
pub const WATERMARK_FILE: &str = "last_updated.json";

/// Reads and writes the watermark of one dataset
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    /// Store for the dataset rooted at `layer_dir`
    pub fn new(layer_dir: impl AsRef<Path>) -> Self {
        Self {
            path: layer_dir.as_ref().join(WATERMARK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current watermark, `None` when the dataset has never been synchronized
    pub async fn load(&self) -> Result<Option<Watermark>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            SyncError::State(format!(
                "Watermark file {} is corrupt: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Current watermark, failing when none has been written yet
    pub async fn require(&self) -> Result<Watermark> {
        self.load().await?.ok_or_else(|| {
            SyncError::State(format!(
                "No watermark at {}; run a full download (--download) before requesting a changeset",
                self.path.display()
            ))
        })
    }

    /// Writes `watermark` unconditionally
    pub async fn save(&self, watermark: &Watermark) -> Result<()> {
        let content = serde_json::to_string(watermark)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Moves the watermark forward to `candidate`.
    ///
    /// A candidate older than the stored value is ignored; the returned
    /// watermark is the one in effect afterwards.
    pub async fn advance(&self, candidate: Watermark) -> Result<Watermark> {
        if let Some(current) = self.load().await? {
            if candidate < current {
                tracing::warn!(
                    current = %current,
                    candidate = %candidate,
                    "Watermark candidate is older than the stored watermark; keeping the stored value"
                );
                return Ok(current);
            }
        }

        self.save(&candidate).await?;
        tracing::info!(watermark = %candidate, "Watermark advanced");
        Ok(candidate)
    }

    /// Writes `initial` only when no watermark exists yet
    pub async fn initialize(&self, initial: Watermark) -> Result<Watermark> {
        match self.load().await? {
            Some(existing) => Ok(existing),
            None => {
                self.save(&initial).await?;
                Ok(initial)
            }
        }
    }
}
