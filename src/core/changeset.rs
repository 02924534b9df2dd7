//! Changeset fetcher
//!
//! One bounded-window WFS query per run. The body is streamed to disk first
//! and only then opened to read the envelope, so a malformed or error
//! response is always left on disk for inspection.

use crate::adapters::remote::models::ChangesetEnvelope;
use crate::adapters::remote::{ChangesetApi, ChangesetQuery};
use crate::core::artifacts::{changeset_file_path, checksum_file, ArtifactHandle};
use crate::core::region::RegionFilter;
use crate::core::state::Watermark;
use crate::domain::ids::LayerId;
use crate::domain::{Result, SyncError};
use crate::log_artifact_written;
use chrono::Utc;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Envelope of a downloaded changeset
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesetSummary {
    /// Features in the window
    pub count: u64,
    /// Server timestamp of the response
    pub server_timestamp: Option<Watermark>,
    /// Requested window end
    pub changes_to: Watermark,
}

impl ChangesetSummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// New watermark once this changeset is applied
    pub fn watermark_candidate(&self) -> Watermark {
        self.server_timestamp.unwrap_or(self.changes_to)
    }
}

pub struct ChangesetFetcher {
    api: Arc<dyn ChangesetApi>,
    region: Arc<RegionFilter>,
    layer_dir: PathBuf,
    layer_id: LayerId,
    wkid: u32,
    cql_filter: Option<String>,
}

impl ChangesetFetcher {
    pub fn new(
        api: Arc<dyn ChangesetApi>,
        region: Arc<RegionFilter>,
        layer_dir: impl Into<PathBuf>,
        layer_id: LayerId,
        wkid: u32,
        cql_filter: Option<String>,
    ) -> Self {
        Self {
            api,
            region,
            layer_dir: layer_dir.into(),
            layer_id,
            wkid,
            cql_filter,
        }
    }

    /// Downloads the changes between `watermark` and now
    #[tracing::instrument(skip(self), fields(layer_id = %self.layer_id, from = %watermark))]
    pub async fn fetch_changeset(
        &self,
        watermark: &Watermark,
    ) -> Result<(ArtifactHandle, ChangesetSummary)> {
        let now = Utc::now();
        let changes_to = Watermark::new(now);

        // a CQL filter and a bbox are mutually exclusive upstream
        let bbox = match (&self.cql_filter, self.region.compute_scope_geometry().await?) {
            (None, Some(scope)) => Some(self.region.to_bbox_parameter(&scope).await?),
            _ => None,
        };

        let query = ChangesetQuery {
            layer_id: self.layer_id,
            wkid: self.wkid,
            from: watermark.to_string(),
            to: changes_to.to_string(),
            cql_filter: self.cql_filter.clone(),
            bbox,
        };
        tracing::debug!(params = ?query.params(), "Changeset query");

        let dest = changeset_file_path(&self.layer_dir, self.layer_id, now);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = self.api.fetch_changeset(&query, &dest).await?;
        let sha256 = checksum_file(&dest).await?;
        log_artifact_written!(dest, bytes, sha256);

        let summary = summarize_changeset_file(&dest, changes_to).await?;
        if summary.is_empty() {
            tracing::info!("No features in the changeset; nothing to apply");
        } else {
            tracing::info!(
                features = summary.count,
                server_timestamp = ?summary.server_timestamp.map(|w| w.to_string()),
                "Changeset downloaded"
            );
        }

        Ok((
            ArtifactHandle {
                path: dest,
                bytes,
                sha256,
            },
            summary,
        ))
    }
}

/// Reads `numberReturned` and `timeStamp` from a changeset file.
///
/// Unparseable content is a transport error: upstream answered with
/// something that is not a feature collection.
pub async fn summarize_changeset_file(path: &Path, changes_to: Watermark) -> Result<ChangesetSummary> {
    let path_buf = path.to_path_buf();
    let envelope = tokio::task::spawn_blocking(move || -> Result<ChangesetEnvelope> {
        let reader = BufReader::new(File::open(&path_buf)?);
        serde_json::from_reader(reader).map_err(|e| {
            SyncError::Transport(format!(
                "Changeset {} could not be parsed; check the file for an error message: {}",
                path_buf.display(),
                e
            ))
        })
    })
    .await
    .map_err(|e| SyncError::Other(format!("Changeset reader task failed: {}", e)))??;

    let server_timestamp = match envelope.time_stamp.as_deref() {
        Some(raw) => match Watermark::parse(raw) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable changeset timestamp");
                None
            }
        },
        None => None,
    };

    Ok(ChangesetSummary {
        count: envelope.count()?,
        server_timestamp,
        changes_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::MemoryStore;
    use crate::domain::geometry::WGS84;
    use crate::domain::{Feature, TableSchema};
    use async_trait::async_trait;
    use geo::{polygon, Geometry};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    struct CannedFeed {
        body: String,
        seen: Mutex<Vec<ChangesetQuery>>,
    }

    #[async_trait]
    impl ChangesetApi for CannedFeed {
        async fn fetch_changeset(&self, query: &ChangesetQuery, dest: &Path) -> Result<u64> {
            self.seen.lock().await.push(query.clone());
            tokio::fs::write(dest, &self.body).await?;
            Ok(self.body.len() as u64)
        }
    }

    fn feed(body: &str) -> Arc<CannedFeed> {
        Arc::new(CannedFeed {
            body: body.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    async fn region(with_extent: bool) -> Arc<RegionFilter> {
        let store = Arc::new(MemoryStore::new().with_projection(2193, WGS84, |c| c));
        if with_extent {
            store
                .seed(
                    "extent",
                    TableSchema::new(vec![], Some(2193)),
                    vec![Feature::new(Some(Geometry::Polygon(polygon![
                        (x: 1.0, y: 2.0),
                        (x: 3.0, y: 2.0),
                        (x: 3.0, y: 4.0),
                    ])))],
                )
                .await
                .unwrap();
        }
        Arc::new(RegionFilter::new(store, "extent", 2193, None))
    }

    fn watermark() -> Watermark {
        Watermark::parse("2024-01-01T00:00:00Z").unwrap()
    }

    #[tokio::test]
    async fn test_zero_results_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let api = feed(r#"{"type":"FeatureCollection","numberReturned":0,"timeStamp":"2024-02-01T00:00:00Z","features":[]}"#);
        let fetcher = ChangesetFetcher::new(api, region(false).await, dir.path(), LayerId::new(9).unwrap(), 2193, None);

        let (handle, summary) = fetcher.fetch_changeset(&watermark()).await.unwrap();
        assert!(summary.is_empty());
        assert_eq!(
            summary.watermark_candidate(),
            Watermark::parse("2024-02-01T00:00:00Z").unwrap()
        );
        assert!(handle.path.starts_with(dir.path().join("changesets")));
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_file() {
        let dir = TempDir::new().unwrap();
        let api = feed("<ows:ExceptionReport>nope</ows:ExceptionReport>");
        let fetcher = ChangesetFetcher::new(api, region(false).await, dir.path(), LayerId::new(9).unwrap(), 2193, None);

        let err = fetcher.fetch_changeset(&watermark()).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));

        let files: Vec<_> = std::fs::read_dir(dir.path().join("changesets")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_timestamp_falls_back_to_window_end() {
        let dir = TempDir::new().unwrap();
        let api = feed(r#"{"type":"FeatureCollection","numberReturned":3,"features":[]}"#);
        let fetcher = ChangesetFetcher::new(api, region(false).await, dir.path(), LayerId::new(9).unwrap(), 2193, None);

        let (_, summary) = fetcher.fetch_changeset(&watermark()).await.unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.watermark_candidate(), summary.changes_to);
    }

    #[tokio::test]
    async fn test_bbox_sent_only_without_cql_filter() {
        let dir = TempDir::new().unwrap();
        let body = r#"{"numberReturned":0,"features":[]}"#;

        let api = feed(body);
        let fetcher = ChangesetFetcher::new(api.clone(), region(true).await, dir.path(), LayerId::new(9).unwrap(), 2193, None);
        fetcher.fetch_changeset(&watermark()).await.unwrap();
        let seen = api.seen.lock().await;
        assert_eq!(seen[0].bbox.as_deref(), Some("1,2,3,4,EPSG:4326"));
        assert!(seen[0].from.starts_with("2024-01-01T00:00:00"));
        drop(seen);

        let api = feed(body);
        let fetcher = ChangesetFetcher::new(
            api.clone(),
            region(true).await,
            dir.path(),
            LayerId::new(9).unwrap(),
            2193,
            Some("status='current'".to_string()),
        );
        fetcher.fetch_changeset(&watermark()).await.unwrap();
        let seen = api.seen.lock().await;
        assert_eq!(seen[0].bbox, None);
        assert_eq!(seen[0].cql_filter.as_deref(), Some("status='current'"));
    }
}
