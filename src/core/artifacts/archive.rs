//! Reading downloaded artifacts into features
//!
//! Changesets arrive as GeoJSON feature collections. Export archives are
//! zip files wrapping one GeoJSON file; they are unpacked into a temporary
//! directory next to the archive that is removed afterwards. Parsing runs on
//! the blocking pool since both files can be large.

use crate::domain::geometry::from_geojson;
use crate::domain::{Feature, FieldValue, Result, SyncError};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Reads every feature of a GeoJSON feature collection file
pub async fn read_feature_collection(path: &Path) -> Result<Vec<Feature>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || parse_feature_collection(&path))
        .await
        .map_err(|e| SyncError::Other(format!("GeoJSON reader task failed: {}", e)))?
}

/// Unpacks an export archive and reads the GeoJSON file inside it
pub async fn read_export_archive(archive: &Path) -> Result<Vec<Feature>> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let parent = archive.parent().unwrap_or_else(|| Path::new("."));
        let workdir = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(parent)?;

        let file = File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| {
            SyncError::Io(format!("{} is not a zip archive: {}", archive.display(), e))
        })?;
        zip.extract(workdir.path()).map_err(|e| {
            SyncError::Io(format!("Failed to extract {}: {}", archive.display(), e))
        })?;

        let geojson = find_geojson(workdir.path())?.ok_or_else(|| {
            SyncError::Io(format!(
                "Export archive {} contains no GeoJSON file",
                archive.display()
            ))
        })?;
        tracing::debug!(archive = %archive.display(), file = %geojson.display(), "Archive extracted");

        parse_feature_collection(&geojson)
    })
    .await
    .map_err(|e| SyncError::Other(format!("Archive reader task failed: {}", e)))?
}

/// First `.geojson`/`.json` file below `dir`, searched depth-first in name order
fn find_geojson(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in &entries {
        if path.is_file() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if matches!(ext.as_deref(), Some("geojson") | Some("json")) {
                return Ok(Some(path.clone()));
            }
        }
    }
    for path in &entries {
        if path.is_dir() {
            if let Some(found) = find_geojson(path)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn parse_feature_collection(path: &Path) -> Result<Vec<Feature>> {
    let reader = BufReader::new(File::open(path)?);
    let collection: geojson::FeatureCollection = serde_json::from_reader(reader).map_err(|e| {
        SyncError::Serialization(format!(
            "{} is not a GeoJSON feature collection: {}",
            path.display(),
            e
        ))
    })?;

    collection
        .features
        .into_iter()
        .map(|feature| {
            let geometry = feature.geometry.map(from_geojson).transpose()?;
            let mut row = Feature::new(geometry);
            for (name, value) in feature.properties.unwrap_or_default() {
                row.set(&name, FieldValue::from_json(&value));
            }
            Ok(row)
        })
        .collect()
}
