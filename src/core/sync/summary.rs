//! Sync run summary and reporting

use crate::core::artifacts::ArtifactHandle;
use crate::core::reconcile::ReconciliationReport;
use crate::core::region::PostFilterReport;
use crate::core::retention::PurgeReport;
use crate::core::state::Watermark;
use std::time::Duration;

/// Summary of one executed action
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// Name of the action that ran
    pub action: String,

    /// Downloaded or processed artifact
    pub artifact: Option<ArtifactHandle>,

    /// Rows loaded into the mirror by a full refresh
    pub features_loaded: u64,

    /// Rows in the changeset window
    pub changes_received: u64,

    /// Out-of-scope rows removed after the download
    pub post_filter: PostFilterReport,

    /// Changeset applied to the mirror
    pub mirror: Option<ReconciliationReport>,

    /// Changeset applied to the target table
    pub target: Option<ReconciliationReport>,

    /// Rows written to the target table by a full refresh
    pub target_rows: Option<u64>,

    /// Watermark in effect after the run
    pub watermark: Option<Watermark>,

    /// Set when `--purge` ran
    pub purge: Option<PurgeReport>,

    pub duration: Duration,
}

impl SyncSummary {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Whether any reconciliation reported a row-count anomaly
    pub fn has_anomaly(&self) -> bool {
        [self.mirror, self.target]
            .iter()
            .flatten()
            .any(|report| report.count_mismatch.is_some())
    }

    /// Emits the summary as one structured log line
    pub fn log(&self) {
        tracing::info!(
            action = %self.action,
            artifact = ?self.artifact.as_ref().map(|a| a.path.display().to_string()),
            features_loaded = self.features_loaded,
            changes_received = self.changes_received,
            removed_outside_region = self.post_filter.outside_region,
            removed_by_filter = self.post_filter.not_matching,
            inserted = self.mirror.map(|r| r.inserted),
            updated = self.mirror.map(|r| r.updated),
            deleted = self.mirror.map(|r| r.deleted),
            anomaly = self.has_anomaly(),
            watermark = ?self.watermark.map(|w| w.to_string()),
            purged = self.purge.map(|p| p.total_removed()),
            duration_secs = self.duration.as_secs_f64(),
            "Sync finished"
        );
    }
}
