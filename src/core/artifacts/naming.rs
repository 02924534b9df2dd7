//! Artifact and table naming
//!
//! Every artifact name embeds its creation time so the retention purger can
//! order artifacts without touching the store's catalog metadata.

use crate::domain::ids::LayerId;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

/// Sub-directory holding downloaded export archives
pub const FULL_DIR: &str = "full";

/// Sub-directory holding raw changeset responses
pub const CHANGESET_DIR: &str = "changesets";

/// Sub-directory holding the JSON file log
pub const LOG_DIR: &str = "logs";

const ARCHIVE_STAMP: &str = "%Y%m%d_%H%M%S";
const CHANGESET_STAMP: &str = "%Y%m%dT%H%M%S";
const TABLE_STAMP: &str = "%Y%m%d_%H%M%S";

/// `<layer_dir>/full/layer_<id>_<YYYYmmdd_HHMMSS>.zip`
pub fn export_archive_path(layer_dir: &Path, layer_id: LayerId, at: DateTime<Utc>) -> PathBuf {
    layer_dir
        .join(FULL_DIR)
        .join(format!("layer_{}_{}.zip", layer_id, at.format(ARCHIVE_STAMP)))
}

/// `<layer_dir>/changesets/layer_<id>_<YYYYmmddTHHMMSS>.json`
pub fn changeset_file_path(layer_dir: &Path, layer_id: LayerId, at: DateTime<Utc>) -> PathBuf {
    layer_dir.join(CHANGESET_DIR).join(format!(
        "layer_{}_{}.json",
        layer_id,
        at.format(CHANGESET_STAMP)
    ))
}

/// `layer_<id>_changeset_<YYYYmmdd_HHMMSS>`
pub fn changeset_table_name(layer_id: LayerId, at: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        layer_id.changeset_table_prefix(),
        at.format(TABLE_STAMP)
    )
}

/// Creation time encoded in a changeset table name
pub fn changeset_table_timestamp(layer_id: LayerId, table: &str) -> Option<DateTime<Utc>> {
    let stamp = table.strip_prefix(&layer_id.changeset_table_prefix())?;
    NaiveDateTime::parse_from_str(stamp, TABLE_STAMP)
        .ok()
        .map(|n| n.and_utc())
}
