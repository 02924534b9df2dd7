//! Export job model

use crate::domain::ids::ExportJobId;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle state of a remote export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportJobState {
    /// Submitted (or resumed) but not yet polled
    Requested,
    Polling,
    Complete,
    Failed,
    /// Polling deadline reached; the job may still finish remotely
    TimedOut,
}

impl ExportJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportJobState::Complete | ExportJobState::Failed | ExportJobState::TimedOut
        )
    }
}

impl fmt::Display for ExportJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportJobState::Requested => "requested",
            ExportJobState::Polling => "polling",
            ExportJobState::Complete => "complete",
            ExportJobState::Failed => "failed",
            ExportJobState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// A remote export job as seen by this process
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub id: ExportJobId,
    pub state: ExportJobState,
    /// Fraction complete in `[0, 1]`, never decreasing
    pub progress: f64,
    /// Set once the job is complete
    pub download_url: Option<String>,
    /// When this process submitted the job
    pub submitted_at: Option<DateTime<Utc>>,
    /// Creation time reported by upstream
    pub created_at: Option<DateTime<Utc>>,
    /// Last upstream state string, for diagnostics
    pub remote_state: Option<String>,
}

impl ExportJob {
    /// A job this process just submitted
    pub fn submitted(id: ExportJobId, at: DateTime<Utc>) -> Self {
        Self {
            submitted_at: Some(at),
            ..Self::resumed(id)
        }
    }

    /// A job submitted by an earlier invocation
    pub fn resumed(id: ExportJobId) -> Self {
        Self {
            id,
            state: ExportJobState::Requested,
            progress: 0.0,
            download_url: None,
            submitted_at: None,
            created_at: None,
            remote_state: None,
        }
    }

    /// Records a progress report, ignoring regressions
    pub fn record_progress(&mut self, progress: f64) {
        if progress > self.progress {
            self.progress = progress.min(1.0);
        }
    }

    /// Instant the exported snapshot corresponds to, the submission time
    /// when known and otherwise upstream's creation time
    pub fn watermark_candidate(&self) -> Option<DateTime<Utc>> {
        self.submitted_at.or(self.created_at)
    }
}
