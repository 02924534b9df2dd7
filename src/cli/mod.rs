//! CLI interface and argument parsing
//!
//! One invocation works on one dataset (`--name`) and performs exactly one
//! action. clap rejects zero or several action flags with a usage error
//! before anything touches the disk or the network.

pub mod commands;

use crate::core::sync::SyncAction;
use crate::domain::ids::{ExportJobId, LayerId};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// geosync - keep a local mirror of a remote geospatial layer in sync
#[derive(Parser, Debug)]
#[command(name = "geosync")]
#[command(version, about, long_about = None)]
#[command(author = "Geosync Contributors")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["init", "download", "resume", "zip", "changeset", "json"])
))]
pub struct Cli {
    /// Friendly dataset name; slugified into the dataset directory name
    #[arg(short, long, env = "GEOSYNC_NAME")]
    pub name: String,

    /// Create the dataset directory, layer.toml and initial watermark
    #[arg(short, long)]
    pub init: bool,

    /// Request a full export of the layer and load it
    #[arg(short, long)]
    pub download: bool,

    /// Resume polling a previously submitted export
    #[arg(short, long, value_name = "JOB_ID")]
    pub resume: Option<ExportJobId>,

    /// Load an export archive that is already on disk
    #[arg(short, long, value_name = "PATH")]
    pub zip: Option<PathBuf>,

    /// Download and apply the changes since the last sync
    #[arg(short, long)]
    pub changeset: bool,

    /// Apply a changeset file that is already on disk
    #[arg(short, long, value_name = "PATH")]
    pub json: Option<PathBuf>,

    /// Purge old artifacts and changeset tables after the action
    #[arg(short, long)]
    pub purge: bool,

    /// Remote layer id (required with --init the first time)
    #[arg(short, long)]
    pub layer: Option<LayerId>,

    /// Identifier field of the layer (required with --init the first time)
    #[arg(short, long)]
    pub field: Option<String>,

    /// EPSG code of the mirror, defaults to 2193
    #[arg(short, long)]
    pub wkid: Option<u32>,

    /// Path to the settings file
    #[arg(short, long, default_value = "geosync.toml", env = "GEOSYNC_SETTINGS")]
    pub settings: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GEOSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// The action selected by the flags
    pub fn action(&self) -> SyncAction {
        if let Some(job_id) = &self.resume {
            SyncAction::ResumeExport {
                job_id: job_id.clone(),
            }
        } else if let Some(path) = &self.zip {
            SyncAction::ProcessArchive { path: path.clone() }
        } else if let Some(path) = &self.json {
            SyncAction::ProcessChangeset { path: path.clone() }
        } else if self.download {
            SyncAction::FullExport
        } else if self.changeset {
            SyncAction::Changeset
        } else {
            SyncAction::Initialize {
                layer_id: self.layer,
                id_field: self.field.clone(),
                wkid: self.wkid,
            }
        }
    }
}
