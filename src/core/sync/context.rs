//! Collaborators of a sync run
//!
//! Everything a run needs is built once per invocation and handed to the
//! coordinator explicitly. Tests assemble a context from an in-memory store
//! and scripted remote APIs; the CLI builds one from the settings file.

use crate::adapters::postgis::{PostgisClient, PostgisStore};
use crate::adapters::remote::{ChangesetApi, ExportApi, RemoteClient};
use crate::adapters::store::FeatureStore;
use crate::config::Settings;
use crate::domain::ids::DatasetName;
use crate::domain::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Default name of the one-row table scoping a dataset
pub const DEFAULT_EXTENT_TABLE: &str = "extent";

pub struct SyncContext {
    pub dataset: DatasetName,
    /// `<data_directory>/<dataset>`
    pub layer_dir: PathBuf,
    pub store: Arc<dyn FeatureStore>,
    pub export_api: Arc<dyn ExportApi>,
    pub changeset_api: Arc<dyn ChangesetApi>,
    /// Base URL export items are resolved against
    pub api_url: String,
    pub extent_table: String,
}

impl SyncContext {
    pub fn new(
        dataset: DatasetName,
        layer_dir: impl Into<PathBuf>,
        store: Arc<dyn FeatureStore>,
        export_api: Arc<dyn ExportApi>,
        changeset_api: Arc<dyn ChangesetApi>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            dataset,
            layer_dir: layer_dir.into(),
            store,
            export_api,
            changeset_api,
            api_url: api_url.into(),
            extent_table: DEFAULT_EXTENT_TABLE.to_string(),
        }
    }

    pub fn with_extent_table(mut self, table: impl Into<String>) -> Self {
        self.extent_table = table.into();
        self
    }

    /// Context backed by PostGIS and the data service configured in `settings`
    pub fn from_settings(settings: &Settings, dataset: DatasetName) -> Result<Self> {
        let layer_dir = settings.application.data_directory.join(dataset.as_str());

        let client = PostgisClient::new(settings.store.clone())?;
        tracing::debug!(
            store = %client.connection_string_safe(),
            schema = %client.schema(),
            "Feature store configured"
        );
        let store: Arc<dyn FeatureStore> = Arc::new(PostgisStore::new(client));

        let remote = Arc::new(RemoteClient::new(settings.remote.clone())?);

        Ok(Self::new(
            dataset,
            layer_dir,
            store,
            remote.clone(),
            remote,
            settings.remote.api_url.clone(),
        )
        .with_extent_table(settings.store.extent_table.clone()))
    }
}
