//! Actions a sync run can perform

use crate::domain::ids::{ExportJobId, LayerId};
use std::fmt;
use std::path::PathBuf;

/// One unit of work for [`super::SyncCoordinator::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Creates the dataset directory, `layer.toml`, the initial watermark
    /// and the extent table. `layer_id` and `id_field` are only needed the
    /// first time.
    Initialize {
        layer_id: Option<LayerId>,
        id_field: Option<String>,
        wkid: Option<u32>,
    },
    /// Requests a new bulk export and loads it into the mirror
    FullExport,
    /// Continues polling an export submitted earlier
    ResumeExport { job_id: ExportJobId },
    /// Loads an export archive already on disk
    ProcessArchive { path: PathBuf },
    /// Fetches and applies the changes since the watermark
    Changeset,
    /// Applies a changeset file already on disk
    ProcessChangeset { path: PathBuf },
}

impl SyncAction {
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Initialize { .. } => "initialize",
            SyncAction::FullExport => "full_export",
            SyncAction::ResumeExport { .. } => "resume_export",
            SyncAction::ProcessArchive { .. } => "process_archive",
            SyncAction::Changeset => "changeset",
            SyncAction::ProcessChangeset { .. } => "process_changeset",
        }
    }

    /// Whether the action rewrites the whole mirror
    pub fn is_full_refresh(&self) -> bool {
        matches!(
            self,
            SyncAction::FullExport | SyncAction::ResumeExport { .. } | SyncAction::ProcessArchive { .. }
        )
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_refresh_actions() {
        assert!(SyncAction::FullExport.is_full_refresh());
        assert!(SyncAction::ProcessArchive { path: "a.zip".into() }.is_full_refresh());
        assert!(!SyncAction::Changeset.is_full_refresh());
        assert!(!SyncAction::ProcessChangeset { path: "a.json".into() }.is_full_refresh());
    }

    #[test]
    fn test_action_names() {
        let resume = SyncAction::ResumeExport {
            job_id: ExportJobId::new("12").unwrap(),
        };
        assert_eq!(resume.to_string(), "resume_export");
        assert_eq!(SyncAction::Changeset.name(), "changeset");
    }
}
