//! Integration tests for the sync coordinator
//!
//! Each test runs real actions against an in-memory feature store and a
//! scripted upstream that serves export statuses, an export archive and a
//! changeset body.

use async_trait::async_trait;
use geosync::adapters::remote::{
    ChangesetApi, ChangesetQuery, ExportApi, ExportRequest, ExportStatus, SubmittedExport,
    ValidationResponse,
};
use geosync::adapters::store::{FeatureStore, MemoryStore};
use geosync::config::{load_layer_config, save_layer_config, RetentionPolicy};
use geosync::core::artifacts::{CHANGESET_DIR, FULL_DIR};
use geosync::core::state::{Watermark, WatermarkStore};
use geosync::core::sync::{SyncAction, SyncContext, SyncCoordinator};
use geosync::domain::geometry::WGS84;
use geosync::domain::{
    Column, DatasetName, ExportJobId, Feature, FieldType, FieldValue, LayerId, SyncError,
    TableSchema,
};
use geo::{polygon, Geometry};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const LAYER: u64 = 50772;

/// Upstream double: every status call pops the next scripted body and
/// repeats the last one once the script runs out
struct FakeUpstream {
    statuses: Mutex<VecDeque<Value>>,
    last_status: Mutex<Value>,
    status_calls: AtomicUsize,
    archive: Vec<u8>,
    changeset: String,
    requests: Mutex<Vec<ExportRequest>>,
    queries: Mutex<Vec<ChangesetQuery>>,
}

impl FakeUpstream {
    fn new(statuses: Vec<Value>, archive: Vec<u8>, changeset: &str) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(json!({"state": "processing"})),
            status_calls: AtomicUsize::new(0),
            archive,
            changeset: changeset.to_string(),
            requests: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExportApi for FakeUpstream {
    async fn validate(&self, _request: &ExportRequest) -> geosync::domain::Result<ValidationResponse> {
        Ok(serde_json::from_value(json!({"items": [{"item": "layer", "is_valid": true}]}))?)
    }

    async fn submit(&self, request: &ExportRequest) -> geosync::domain::Result<SubmittedExport> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(serde_json::from_value(json!({"id": 99, "url": "https://x/exports/99/"}))?)
    }

    async fn status(&self, _job_id: &ExportJobId) -> geosync::domain::Result<ExportStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(serde_json::from_value(last.clone())?)
    }

    fn download_url(&self, job_id: &ExportJobId) -> String {
        format!("https://x/exports/{job_id}/download/")
    }

    async fn download_to(&self, _job_id: &ExportJobId, dest: &Path) -> geosync::domain::Result<u64> {
        tokio::fs::write(dest, &self.archive).await?;
        Ok(self.archive.len() as u64)
    }
}

#[async_trait]
impl ChangesetApi for FakeUpstream {
    async fn fetch_changeset(&self, query: &ChangesetQuery, dest: &Path) -> geosync::domain::Result<u64> {
        self.queries.lock().unwrap().push(query.clone());
        tokio::fs::write(dest, &self.changeset).await?;
        Ok(self.changeset.len() as u64)
    }
}

fn point_feature(id: f64, name: &str, change: Option<&str>, x: f64, y: f64) -> Value {
    let mut properties = json!({"t50_fid": id, "name": name});
    if let Some(tag) = change {
        properties["__change__"] = json!(tag);
    }
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": {"type": "Point", "coordinates": [x, y]}
    })
}

fn collection(features: Vec<Value>, time_stamp: Option<&str>) -> String {
    let mut body = json!({
        "type": "FeatureCollection",
        "numberReturned": features.len(),
        "features": features,
    });
    if let Some(stamp) = time_stamp {
        body["timeStamp"] = json!(stamp);
    }
    body.to_string()
}

fn zip_bytes(geojson: &str) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        zip.start_file("layer_50772.geojson", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(geojson.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

/// Mirror content {1: "a", 2: "b"} as an export archive
fn base_archive() -> Vec<u8> {
    zip_bytes(&collection(
        vec![
            point_feature(1.0, "a", None, 1.0, 1.0),
            point_feature(2.0, "b", None, 2.0, 2.0),
        ],
        None,
    ))
}

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    upstream: Arc<FakeUpstream>,
    coordinator: SyncCoordinator,
}

impl Harness {
    fn new(upstream: FakeUpstream) -> Self {
        Self::with_store(upstream, MemoryStore::new())
    }

    fn with_store(upstream: FakeUpstream, store: MemoryStore) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store);
        let upstream = Arc::new(upstream);
        let ctx = SyncContext::new(
            DatasetName::new("NZ Roads").unwrap(),
            dir.path().join("nz-roads"),
            store.clone(),
            upstream.clone(),
            upstream.clone(),
            "https://x/",
        );
        Self {
            dir,
            store,
            upstream,
            coordinator: SyncCoordinator::new(ctx),
        }
    }

    fn layer_dir(&self) -> PathBuf {
        self.dir.path().join("nz-roads")
    }

    fn watermarks(&self) -> WatermarkStore {
        WatermarkStore::new(self.layer_dir())
    }

    /// Initializes the dataset and rewinds the watermark to a known instant
    async fn initialized(self) -> Self {
        self.coordinator
            .execute(SyncAction::Initialize {
                layer_id: Some(LayerId::new(LAYER).unwrap()),
                id_field: Some("T50_FID".to_string()),
                wkid: None,
            })
            .await
            .unwrap();
        self.watermarks()
            .save(&Watermark::parse("2024-01-01T00:00:00Z").unwrap())
            .await
            .unwrap();
        self
    }

    /// Initializes and loads {1: "a", 2: "b"} into the mirror
    async fn loaded(self) -> Self {
        let this = self.initialized().await;
        let archive = this.dir.path().join("seed.zip");
        std::fs::write(&archive, base_archive()).unwrap();
        this.coordinator
            .execute(SyncAction::ProcessArchive { path: archive })
            .await
            .unwrap();
        this
    }

    fn write_changeset(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("changes.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn rows(&self, table: &str) -> Vec<(i64, String)> {
        let mut rows: Vec<(i64, String)> = self
            .store
            .load_features(table)
            .await
            .unwrap()
            .iter()
            .map(|f| {
                (
                    f.get("t50_fid").and_then(FieldValue::as_exact_i64).unwrap(),
                    f.get("name").map(|v| v.to_string()).unwrap_or_default(),
                )
            })
            .collect();
        rows.sort();
        rows
    }
}

fn mirror() -> String {
    LayerId::new(LAYER).unwrap().mirror_table()
}

fn row(id: i64, name: &str) -> (i64, String) {
    (id, name.to_string())
}

#[tokio::test]
async fn test_initialize_requires_layer_and_field() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], ""));

    let err = h
        .coordinator
        .execute(SyncAction::Initialize {
            layer_id: None,
            id_field: None,
            wkid: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Usage(_)));
    assert_eq!(err.exit_code(), 2);

    // nothing written before the options were rejected
    assert!(!h.layer_dir().exists());
    assert!(!h.store.table_exists("extent").await.unwrap());

    let err = h
        .coordinator
        .execute(SyncAction::Initialize {
            layer_id: Some(LayerId::new(LAYER).unwrap()),
            id_field: Some("t50_fid".to_string()),
            wkid: Some(0),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert!(!h.layer_dir().exists());
}

#[tokio::test]
async fn test_initialize_writes_dataset_layout() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], ""));
    let summary = h
        .coordinator
        .execute(SyncAction::Initialize {
            layer_id: Some(LayerId::new(LAYER).unwrap()),
            id_field: Some("t50_fid".to_string()),
            wkid: Some(4326),
        })
        .await
        .unwrap();

    let dir = h.layer_dir();
    assert!(dir.join(FULL_DIR).is_dir());
    assert!(dir.join(CHANGESET_DIR).is_dir());
    assert!(summary.watermark.is_some());
    assert_eq!(h.watermarks().load().await.unwrap(), summary.watermark);

    let layer = load_layer_config(&dir).unwrap();
    assert_eq!(layer.layer_id.value(), LAYER);
    assert_eq!(layer.wkid, 4326);
    assert_eq!(h.store.schema("extent").await.unwrap().srid, Some(4326));

    // a second run keeps the existing configuration and watermark
    h.coordinator
        .execute(SyncAction::Initialize {
            layer_id: None,
            id_field: None,
            wkid: None,
        })
        .await
        .unwrap();
    assert_eq!(load_layer_config(&dir).unwrap(), layer);
    assert_eq!(h.watermarks().load().await.unwrap(), summary.watermark);
}

#[tokio::test]
async fn test_full_export_replaces_mirror_and_advances_watermark() {
    let upstream = FakeUpstream::new(
        vec![json!({"state": "complete", "progress": 1.0})],
        base_archive(),
        "",
    );
    let h = Harness::new(upstream).initialized().await;

    let summary = h.coordinator.execute(SyncAction::FullExport).await.unwrap();

    assert_eq!(summary.features_loaded, 2);
    assert_eq!(h.rows(&mirror()).await, vec![row(1, "a"), row(2, "b")]);
    let schema = h.store.schema(&mirror()).await.unwrap();
    assert_eq!(schema.column("t50_fid").unwrap().field_type, FieldType::Integer);

    let artifact = summary.artifact.unwrap();
    assert!(artifact.path.starts_with(h.layer_dir().join(FULL_DIR)));
    assert_eq!(artifact.sha256.len(), 64);

    let watermark = h.watermarks().load().await.unwrap().unwrap();
    assert!(watermark > Watermark::parse("2024-01-01T00:00:00Z").unwrap());
    assert_eq!(summary.watermark, Some(watermark));

    // unscoped: no extent sent with the request
    assert_eq!(h.upstream.requests.lock().unwrap()[0].extent, None);
}

#[tokio::test]
async fn test_scoped_full_export_sends_extent_and_drops_outside_rows() {
    let archive = zip_bytes(&collection(
        vec![
            point_feature(1.0, "inside", None, 5.0, 5.0),
            point_feature(2.0, "outside", None, 50.0, 50.0),
        ],
        None,
    ));
    let upstream = FakeUpstream::new(vec![json!({"state": "complete"})], archive, "");
    let store = MemoryStore::new().with_projection(2193, WGS84, |c| c);
    let h = Harness::with_store(upstream, store).initialized().await;
    h.store
        .append(
            "extent",
            &[Feature::new(Some(Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 0.0, y: 10.0),
            ])))],
        )
        .await
        .unwrap();

    let summary = h.coordinator.execute(SyncAction::FullExport).await.unwrap();

    assert_eq!(summary.post_filter.outside_region, 1);
    assert_eq!(h.rows(&mirror()).await, vec![row(1, "inside")]);

    let requests = h.upstream.requests.lock().unwrap();
    let extent = requests[0].extent.as_ref().unwrap();
    assert_eq!(extent["type"], "Polygon");
    // envelope grown by the default 1000 unit buffer
    let xs: Vec<f64> = extent["coordinates"][0]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c[0].as_f64().unwrap())
        .collect();
    assert_eq!(xs.iter().cloned().fold(f64::INFINITY, f64::min), -1000.0);
    assert_eq!(xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max), 1010.0);
}

#[tokio::test]
async fn test_scenario_a_changeset_insert_and_delete() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], "")).loaded().await;
    let path = h.write_changeset(&collection(
        vec![
            point_feature(3.0, "c", Some("INSERT"), 3.0, 3.0),
            point_feature(1.0, "a", Some("DELETE"), 1.0, 1.0),
        ],
        Some("2024-06-20T01:02:03.123456Z"),
    ));

    let summary = h
        .coordinator
        .execute(SyncAction::ProcessChangeset { path })
        .await
        .unwrap();

    assert_eq!(h.rows(&mirror()).await, vec![row(2, "b"), row(3, "c")]);
    let report = summary.mirror.unwrap();
    assert_eq!((report.inserted, report.deleted, report.updated), (1, 1, 0));
    assert_eq!(report.count_mismatch, None);
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-06-20T01:02:03.123456Z").unwrap())
    );

    // the changeset was materialized as its own table
    let prefix = LayerId::new(LAYER).unwrap().changeset_table_prefix();
    assert_eq!(h.store.list_tables(&prefix).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replaying_a_changeset_file_succeeds() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], "")).loaded().await;
    let path = h.write_changeset(&collection(
        vec![
            point_feature(3.0, "c", Some("INSERT"), 3.0, 3.0),
            point_feature(1.0, "a", Some("DELETE"), 1.0, 1.0),
        ],
        Some("2024-06-20T00:00:00Z"),
    ));

    for _ in 0..2 {
        h.coordinator
            .execute(SyncAction::ProcessChangeset { path: path.clone() })
            .await
            .unwrap();
    }

    assert_eq!(h.rows(&mirror()).await, vec![row(2, "b"), row(3, "c")]);
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-06-20T00:00:00Z").unwrap())
    );
}

#[tokio::test]
async fn test_insert_of_existing_identifier_is_an_anomaly() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], "")).loaded().await;
    let path = h.write_changeset(&collection(
        vec![point_feature(2.0, "b-again", Some("INSERT"), 2.0, 2.0)],
        Some("2024-06-21T00:00:00Z"),
    ));

    let summary = h
        .coordinator
        .execute(SyncAction::ProcessChangeset { path })
        .await
        .unwrap();

    let report = summary.mirror.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.count_mismatch, Some(1));
    assert!(summary.has_anomaly());
    assert_eq!(h.rows(&mirror()).await, vec![row(1, "a"), row(2, "b")]);
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-06-21T00:00:00Z").unwrap())
    );
}

#[tokio::test]
async fn test_scenario_b_empty_changeset_advances_watermark_only() {
    let body = collection(vec![], Some("2024-03-01T00:00:00Z"));
    let h = Harness::new(FakeUpstream::new(vec![], vec![], &body))
        .loaded()
        .await;

    let summary = h.coordinator.execute(SyncAction::Changeset).await.unwrap();

    assert_eq!(summary.changes_received, 0);
    assert!(summary.mirror.is_none());
    assert_eq!(h.rows(&mirror()).await, vec![row(1, "a"), row(2, "b")]);
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-03-01T00:00:00Z").unwrap())
    );

    let prefix = LayerId::new(LAYER).unwrap().changeset_table_prefix();
    assert!(h.store.list_tables(&prefix).await.unwrap().is_empty());

    // the window started at the stored watermark
    let queries = h.upstream.queries.lock().unwrap();
    assert!(queries[0].from.starts_with("2024-01-01T00:00:00"));
    assert_eq!(queries[0].bbox, None);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_resume_times_out_with_job_id() {
    let upstream = FakeUpstream::new(vec![json!({"state": "running", "progress": 0.1})], vec![], "");
    let h = Harness::new(upstream).initialized().await;

    let err = h
        .coordinator
        .execute(SyncAction::ResumeExport {
            job_id: ExportJobId::new("77").unwrap(),
        })
        .await
        .unwrap_err();

    match &err {
        SyncError::Timeout { job_id } => assert_eq!(job_id, "77"),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 6);
    assert_eq!(h.upstream.status_calls.load(Ordering::SeqCst), 60);
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-01-01T00:00:00Z").unwrap())
    );
}

#[tokio::test]
async fn test_scenario_d_integer_identifier_only_reindexed() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], "")).loaded().await;
    let before_schema = h.store.schema(&mirror()).await.unwrap();
    let before_rows = h.store.load_features(&mirror()).await.unwrap();

    // replaying an empty local changeset runs the coordinator without touching data
    let path = h.write_changeset(&collection(vec![], Some("2024-02-01T00:00:00Z")));
    h.coordinator
        .execute(SyncAction::ProcessChangeset { path })
        .await
        .unwrap();

    let outcome = geosync::core::reconcile::normalize_identifier(
        h.store.as_ref(),
        &mirror(),
        "t50_fid",
    )
    .await
    .unwrap();
    assert_eq!(outcome, geosync::core::reconcile::NormalizeOutcome::Indexed);
    assert_eq!(h.store.schema(&mirror()).await.unwrap(), before_schema);
    assert_eq!(h.store.load_features(&mirror()).await.unwrap(), before_rows);
    assert_eq!(h.store.unique_indexes(&mirror()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_target_table_follows_mirror() {
    let h = Harness::new(FakeUpstream::new(vec![], vec![], ""))
        .initialized()
        .await;
    let mut layer = load_layer_config(h.layer_dir()).unwrap();
    layer.target_table = Some("roads_published".to_string());
    save_layer_config(h.layer_dir(), &layer).unwrap();
    h.store
        .seed(
            "roads_published",
            TableSchema::new(
                vec![
                    Column::new("t50_fid", FieldType::Integer),
                    Column::new("name", FieldType::Text),
                ],
                Some(2193),
            ),
            vec![Feature::default()
                .with("t50_fid", FieldValue::Integer(500))
                .with("name", FieldValue::Text("stale".into()))],
        )
        .await
        .unwrap();

    let archive = h.dir.path().join("seed.zip");
    std::fs::write(&archive, base_archive()).unwrap();
    let summary = h
        .coordinator
        .execute(SyncAction::ProcessArchive { path: archive })
        .await
        .unwrap();
    assert_eq!(summary.target_rows, Some(2));
    assert_eq!(h.rows("roads_published").await, vec![row(1, "a"), row(2, "b")]);

    let path = h.write_changeset(&collection(
        vec![
            point_feature(2.0, "b2", Some("UPDATE"), 2.0, 2.0),
            point_feature(1.0, "", Some("delete"), 1.0, 1.0),
        ],
        Some("2024-05-01T00:00:00Z"),
    ));
    let summary = h
        .coordinator
        .execute(SyncAction::ProcessChangeset { path })
        .await
        .unwrap();

    assert_eq!(h.rows(&mirror()).await, vec![row(2, "b2")]);
    assert_eq!(h.rows("roads_published").await, vec![row(2, "b2")]);
    assert_eq!(summary.target.unwrap().updated, 1);
    assert!(!summary.has_anomaly());
}

#[tokio::test]
async fn test_changeset_without_mirror_is_a_state_error() {
    let body = collection(
        vec![point_feature(3.0, "c", Some("INSERT"), 3.0, 3.0)],
        Some("2024-06-01T00:00:00Z"),
    );
    let h = Harness::new(FakeUpstream::new(vec![], vec![], &body))
        .initialized()
        .await;

    let err = h.coordinator.execute(SyncAction::Changeset).await.unwrap_err();
    assert!(matches!(err, SyncError::State(_)));
    assert_eq!(
        h.watermarks().load().await.unwrap(),
        Some(Watermark::parse("2024-01-01T00:00:00Z").unwrap())
    );
    // the downloaded changeset stays on disk
    assert_eq!(
        std::fs::read_dir(h.layer_dir().join(CHANGESET_DIR)).unwrap().count(),
        1
    );
}

#[tokio::test]
async fn test_purge_after_changeset() {
    let body = collection(
        vec![point_feature(3.0, "c", Some("INSERT"), 3.0, 3.0)],
        Some("2024-06-01T00:00:00Z"),
    );
    let h = Harness::new(FakeUpstream::new(vec![], vec![], &body))
        .loaded()
        .await;
    h.coordinator.execute(SyncAction::Changeset).await.unwrap();

    let mut layer = load_layer_config(h.layer_dir()).unwrap();
    layer.retain_after_purge = RetentionPolicy::Keep(0);
    save_layer_config(h.layer_dir(), &layer).unwrap();

    let report = h.coordinator.purge().await.unwrap();
    assert_eq!(report.changesets_deleted, 1);
    assert_eq!(report.tables_dropped, 1);
    assert!(h.store.table_exists(&mirror()).await.unwrap());
    assert_eq!(h.rows(&mirror()).await, vec![row(1, "a"), row(2, "b"), row(3, "c")]);
}
