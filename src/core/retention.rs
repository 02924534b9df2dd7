//! Retention purger
//!
//! Bounds the history kept for a dataset. Raw export archives, raw changeset
//! responses and materialized changeset tables are each ordered newest first
//! and everything past the configured count is removed. A failure to remove
//! one artifact is logged and does not stop the others.

use crate::adapters::store::FeatureStore;
use crate::config::RetentionPolicy;
use crate::core::artifacts::{changeset_table_timestamp, CHANGESET_DIR, FULL_DIR};
use crate::domain::ids::LayerId;
use crate::domain::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// What a purge removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub archives_deleted: usize,
    pub changesets_deleted: usize,
    pub tables_dropped: usize,
    /// Artifacts that could not be removed
    pub failures: usize,
}

impl PurgeReport {
    pub fn total_removed(&self) -> usize {
        self.archives_deleted + self.changesets_deleted + self.tables_dropped
    }
}

pub struct RetentionPurger {
    store: Arc<dyn FeatureStore>,
    layer_dir: PathBuf,
    layer_id: LayerId,
}

impl RetentionPurger {
    pub fn new(store: Arc<dyn FeatureStore>, layer_dir: impl Into<PathBuf>, layer_id: LayerId) -> Self {
        Self {
            store,
            layer_dir: layer_dir.into(),
            layer_id,
        }
    }

    /// Applies `policy` to every artifact kind independently
    #[tracing::instrument(skip(self), fields(layer_id = %self.layer_id))]
    pub async fn purge(&self, policy: RetentionPolicy) -> Result<PurgeReport> {
        let keep = match policy {
            RetentionPolicy::Disabled => {
                tracing::info!("Retention disabled; nothing purged");
                return Ok(PurgeReport::default());
            }
            RetentionPolicy::Keep(n) => n,
        };

        let mut report = PurgeReport::default();

        let (deleted, failed) = purge_directory(&self.layer_dir.join(FULL_DIR), "zip", keep).await?;
        report.archives_deleted = deleted;
        report.failures += failed;

        let (deleted, failed) = purge_directory(&self.layer_dir.join(CHANGESET_DIR), "json", keep).await?;
        report.changesets_deleted = deleted;
        report.failures += failed;

        let (dropped, failed) = self.purge_tables(keep).await?;
        report.tables_dropped = dropped;
        report.failures += failed;

        tracing::info!(
            keep,
            archives = report.archives_deleted,
            changesets = report.changesets_deleted,
            tables = report.tables_dropped,
            failures = report.failures,
            "Purge complete"
        );
        Ok(report)
    }

    async fn purge_tables(&self, keep: usize) -> Result<(usize, usize)> {
        let prefix = self.layer_id.changeset_table_prefix();
        let mut tables: Vec<(DateTime<Utc>, String)> = Vec::new();
        for table in self.store.list_tables(&prefix).await? {
            match changeset_table_timestamp(self.layer_id, &table) {
                Some(at) => tables.push((at, table)),
                None => tracing::warn!(table = %table, "Table name carries no timestamp; left alone"),
            }
        }
        tables.sort_by(|a, b| b.cmp(a));

        let (mut dropped, mut failed) = (0, 0);
        for (_, table) in tables.into_iter().skip(keep) {
            match self.store.drop_table(&table).await {
                Ok(()) => {
                    tracing::debug!(table = %table, "Changeset table dropped");
                    dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "Could not drop changeset table");
                    failed += 1;
                }
            }
        }
        Ok((dropped, failed))
    }
}

/// Keeps the `keep` newest `*.{extension}` files of `dir`. Other files are
/// never touched. A missing directory holds nothing to purge.
async fn purge_directory(dir: &Path, extension: &str, keep: usize) -> Result<(usize, usize)> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let path = entry.path();
        if !metadata.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((created, path));
    }
    // names embed a timestamp, so they break ties between equal times
    files.sort_by(|a, b| b.cmp(a));

    let (mut deleted, mut failed) = (0, 0);
    for (_, path) in files.into_iter().skip(keep) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Artifact deleted");
                deleted += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not delete artifact");
                failed += 1;
            }
        }
    }
    Ok((deleted, failed))
}
