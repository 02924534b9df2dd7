//! Sync coordinator - dispatches one action against one dataset
//!
//! Every flow ends the same way: the authoritative write (mirror, then the
//! target table when configured) completes, and only then does the
//! watermark move. A failure anywhere before that leaves the watermark and
//! all downloaded artifacts as they were, so the run can be repeated.

use super::action::SyncAction;
use super::context::SyncContext;
use super::summary::SyncSummary;
use crate::adapters::remote::ExportRequest;
use crate::config::{load_layer_config, save_layer_config, LayerConfig, LAYER_CONFIG_FILE};
use crate::core::artifacts::{
    changeset_table_name, export_archive_path, read_export_archive, read_feature_collection,
    CHANGESET_DIR, FULL_DIR, LOG_DIR,
};
use crate::core::changeset::{summarize_changeset_file, ChangesetFetcher, ChangesetSummary};
use crate::core::export::{ExportJob, ExportJobController, ExportJobState};
use crate::core::reconcile::{normalize_identifier, NormalizeOutcome, Reconciler};
use crate::core::region::RegionFilter;
use crate::core::retention::{PurgeReport, RetentionPurger};
use crate::core::state::{Watermark, WatermarkStore};
use crate::domain::ids::{ExportJobId, LayerId};
use crate::domain::{Feature, Result, SyncError, TableSchema};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub struct SyncCoordinator {
    ctx: SyncContext,
    watermarks: WatermarkStore,
}

impl SyncCoordinator {
    pub fn new(ctx: SyncContext) -> Self {
        let watermarks = WatermarkStore::new(&ctx.layer_dir);
        Self { ctx, watermarks }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Runs `action` to completion
    #[tracing::instrument(skip(self, action), fields(dataset = %self.ctx.dataset, action = %action))]
    pub async fn execute(&self, action: SyncAction) -> Result<SyncSummary> {
        let started = Instant::now();
        let mut summary = SyncSummary::new(action.name());

        match action {
            SyncAction::Initialize {
                layer_id,
                id_field,
                wkid,
            } => {
                self.initialize(layer_id, id_field.as_deref(), wkid).await?;
                summary.watermark = self.watermarks.load().await?;
            }
            SyncAction::FullExport => {
                let layer = self.layer().await?;
                self.full_export(&layer, &mut summary).await?;
            }
            SyncAction::ResumeExport { job_id } => {
                let layer = self.layer().await?;
                self.resume_export(&layer, job_id, &mut summary).await?;
            }
            SyncAction::ProcessArchive { path } => {
                let layer = self.layer().await?;
                self.load_archive(&layer, &path, None, &mut summary).await?;
            }
            SyncAction::Changeset => {
                let layer = self.layer().await?;
                self.changeset(&layer, &mut summary).await?;
            }
            SyncAction::ProcessChangeset { path } => {
                let layer = self.layer().await?;
                self.process_changeset(&layer, &path, &mut summary).await?;
            }
        }

        Ok(summary.with_duration(started.elapsed()))
    }

    /// Applies the dataset's retention policy
    pub async fn purge(&self) -> Result<PurgeReport> {
        let layer = load_layer_config(&self.ctx.layer_dir)?;
        RetentionPurger::new(self.ctx.store.clone(), &self.ctx.layer_dir, layer.layer_id)
            .purge(layer.retain_after_purge)
            .await
    }

    /// Loads `layer.toml` and logs where the dataset stands
    async fn layer(&self) -> Result<LayerConfig> {
        let layer = load_layer_config(&self.ctx.layer_dir)?;
        let watermark = self.watermarks.load().await?;
        tracing::info!(
            layer_id = %layer.layer_id,
            id_field = %layer.id_field,
            wkid = layer.wkid,
            target_table = ?layer.target_table,
            retention = %layer.retain_after_purge,
            watermark = ?watermark.map(|w| w.to_string()),
            store = %self.ctx.store.describe_backend(),
            "Dataset status"
        );
        Ok(layer)
    }

    async fn initialize(
        &self,
        layer_id: Option<LayerId>,
        id_field: Option<&str>,
        wkid: Option<u32>,
    ) -> Result<()> {
        let dir = &self.ctx.layer_dir;
        // options are checked before anything touches the disk
        let (layer, is_new) = if dir.join(LAYER_CONFIG_FILE).exists() {
            let existing = load_layer_config(dir)?;
            tracing::info!(
                path = %dir.join(LAYER_CONFIG_FILE).display(),
                "Dataset already initialized; keeping its configuration"
            );
            (existing, false)
        } else {
            let (Some(layer_id), Some(id_field)) = (layer_id, id_field) else {
                return Err(SyncError::Usage(
                    "--layer and --field are required to initialize a new dataset".to_string(),
                ));
            };
            let mut layer = LayerConfig::new(layer_id, id_field);
            if let Some(wkid) = wkid {
                layer.wkid = wkid;
            }
            layer
                .validate()
                .map_err(|e| SyncError::Configuration(format!("Invalid layer options: {e}")))?;
            (layer, true)
        };

        for sub in [FULL_DIR, CHANGESET_DIR, LOG_DIR] {
            tokio::fs::create_dir_all(dir.join(sub)).await?;
        }

        if is_new {
            save_layer_config(dir, &layer)?;
            tracing::info!(
                path = %dir.join(LAYER_CONFIG_FILE).display(),
                "Layer configuration written; review it before the first download"
            );
        }

        let watermark = self.watermarks.initialize(Watermark::now()).await?;
        tracing::debug!(watermark = %watermark, "Initial watermark in place");

        if !self.ctx.store.table_exists(&self.ctx.extent_table).await? {
            self.ctx
                .store
                .create_table(&self.ctx.extent_table, &TableSchema::new(vec![], Some(layer.wkid)))
                .await?;
            tracing::info!(
                table = %self.ctx.extent_table,
                "Extent table created; insert one polygon to scope this dataset"
            );
        }

        tracing::info!(dir = %dir.display(), "Dataset initialized");
        Ok(())
    }

    fn region(&self, layer: &LayerConfig) -> Arc<RegionFilter> {
        Arc::new(RegionFilter::new(
            self.ctx.store.clone(),
            self.ctx.extent_table.clone(),
            layer.wkid,
            layer.sql_filter.clone(),
        ))
    }

    fn controller(&self, layer: &LayerConfig) -> ExportJobController {
        ExportJobController::new(
            self.ctx.export_api.clone(),
            layer.poll_interval(),
            layer.max_polling_time(),
        )
    }

    async fn full_export(&self, layer: &LayerConfig, summary: &mut SyncSummary) -> Result<()> {
        let region = self.region(layer);
        let mut request = ExportRequest::for_layer(
            &self.ctx.api_url,
            layer.layer_id,
            layer.wkid,
            &layer.export_format,
        );
        if let Some(scope) = region.compute_scope_geometry().await? {
            let extent = region
                .to_buffered_request_geometry(&scope, layer.initial_buffer)
                .await?;
            request = request.with_extent(extent);
        }

        let controller = self.controller(layer);
        let job = controller.run(&request).await?;
        self.download_and_load(layer, &controller, job, summary).await
    }

    async fn resume_export(
        &self,
        layer: &LayerConfig,
        job_id: ExportJobId,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let controller = self.controller(layer);
        let job = controller.resume(job_id).await?;
        self.download_and_load(layer, &controller, job, summary).await
    }

    async fn download_and_load(
        &self,
        layer: &LayerConfig,
        controller: &ExportJobController,
        job: ExportJob,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        match job.state {
            ExportJobState::Complete => {}
            ExportJobState::TimedOut => {
                return Err(SyncError::Timeout {
                    job_id: job.id.to_string(),
                })
            }
            ExportJobState::Failed => {
                return Err(SyncError::Transport(format!(
                    "export {} ended upstream in state '{}'",
                    job.id,
                    job.remote_state.as_deref().unwrap_or("unknown")
                )))
            }
            other => {
                return Err(SyncError::State(format!(
                    "export {} stopped polling in state {}",
                    job.id, other
                )))
            }
        }

        let dest = export_archive_path(&self.ctx.layer_dir, layer.layer_id, Utc::now());
        let handle = controller.download(&job, &dest).await?;
        let candidate = job.watermark_candidate().map(Watermark::new);
        summary.artifact = Some(handle.clone());
        self.load_archive(layer, &handle.path, candidate, summary).await
    }

    /// Replaces the mirror with the archive content and refreshes the target
    async fn load_archive(
        &self,
        layer: &LayerConfig,
        archive: &Path,
        candidate: Option<Watermark>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let features = read_export_archive(archive).await?;
        tracing::info!(archive = %archive.display(), features = features.len(), "Export archive read");

        let mirror = layer.layer_id.mirror_table();
        summary.features_loaded = self.replace_table(&mirror, &features, layer.wkid).await?;
        self.normalize(&mirror, &layer.id_field).await?;
        summary.post_filter = self.region(layer).apply_post_filter(&mirror).await?;

        if let Some(target) = &layer.target_table {
            summary.target_rows = self.refresh_target(target, &mirror, &layer.id_field).await?;
        }

        summary.watermark = Some(self.advance_or_keep(candidate).await?);
        Ok(())
    }

    async fn replace_table(&self, table: &str, features: &[Feature], wkid: u32) -> Result<u64> {
        let store = &self.ctx.store;
        store.drop_table(table).await?;
        store
            .create_table(table, &TableSchema::infer(features, Some(wkid)))
            .await?;
        let rows = store.append(table, features).await?;
        tracing::info!(table, rows, "Table loaded");
        Ok(rows)
    }

    /// Truncates the target and copies the mirror into it. A missing target
    /// is skipped.
    async fn refresh_target(&self, target: &str, mirror: &str, id_field: &str) -> Result<Option<u64>> {
        let store = &self.ctx.store;
        if !store.table_exists(target).await? {
            tracing::error!(table = %target, "Target table does not exist; skipping its update");
            return Ok(None);
        }

        tracing::info!(table = %target, "Truncating target and appending all features");
        store.truncate(target).await?;
        let rows = store.append(target, &store.load_features(mirror).await?).await?;
        self.normalize(target, id_field).await?;
        tracing::info!(table = %target, rows, "Target refreshed");
        Ok(Some(rows))
    }

    async fn normalize(&self, table: &str, id_field: &str) -> Result<()> {
        if let NormalizeOutcome::Skipped(reason) =
            normalize_identifier(self.ctx.store.as_ref(), table, id_field).await?
        {
            tracing::warn!(table, reason = %reason, "Identifier left as is");
        }
        Ok(())
    }

    /// Advances to `candidate`. Without one the stored watermark is kept, or
    /// the current time is written when there is none.
    async fn advance_or_keep(&self, candidate: Option<Watermark>) -> Result<Watermark> {
        match candidate {
            Some(candidate) => self.watermarks.advance(candidate).await,
            None => match self.watermarks.load().await? {
                Some(current) => {
                    tracing::warn!(
                        watermark = %current,
                        "Snapshot time unknown; keeping the stored watermark"
                    );
                    Ok(current)
                }
                None => self.watermarks.advance(Watermark::now()).await,
            },
        }
    }

    async fn changeset(&self, layer: &LayerConfig, summary: &mut SyncSummary) -> Result<()> {
        let watermark = self.watermarks.require().await?;
        let fetcher = ChangesetFetcher::new(
            self.ctx.changeset_api.clone(),
            self.region(layer),
            &self.ctx.layer_dir,
            layer.layer_id,
            layer.wkid,
            layer.cql_filter.clone(),
        );
        let (handle, changes) = fetcher.fetch_changeset(&watermark).await?;
        summary.artifact = Some(handle.clone());
        self.apply_changeset(layer, &handle.path, changes, summary).await
    }

    async fn process_changeset(
        &self,
        layer: &LayerConfig,
        path: &Path,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let changes = summarize_changeset_file(path, Watermark::now()).await?;
        tracing::info!(path = %path.display(), features = changes.count, "Processing local changeset");
        self.apply_changeset(layer, path, changes, summary).await
    }

    async fn apply_changeset(
        &self,
        layer: &LayerConfig,
        path: &Path,
        changes: ChangesetSummary,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        summary.changes_received = changes.count;
        if changes.is_empty() {
            summary.watermark = Some(self.watermarks.advance(changes.watermark_candidate()).await?);
            return Ok(());
        }

        let store = &self.ctx.store;
        let mirror = layer.layer_id.mirror_table();
        if !store.table_exists(&mirror).await? {
            return Err(SyncError::State(format!(
                "mirror table {mirror} does not exist; run a full download (--download) first"
            )));
        }

        let features = read_feature_collection(path).await?;
        let table = changeset_table_name(layer.layer_id, Utc::now());
        self.replace_table(&table, &features, layer.wkid).await?;
        self.normalize(&table, &layer.id_field).await?;
        summary.post_filter = self.region(layer).apply_post_filter(&table).await?;

        let reconciler = Reconciler::new(store.clone(), &layer.id_field);
        self.normalize(&mirror, &layer.id_field).await?;
        summary.mirror = Some(reconciler.reconcile(&table, &mirror).await?);

        if let Some(target) = &layer.target_table {
            if store.table_exists(target).await? {
                self.normalize(target, &layer.id_field).await?;
                summary.target = Some(reconciler.reconcile(&table, target).await?);
            } else {
                tracing::error!(table = %target, "Target table does not exist; skipping its update");
            }
        }

        summary.watermark = Some(self.watermarks.advance(changes.watermark_candidate()).await?);
        Ok(())
    }
}
