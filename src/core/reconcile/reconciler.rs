//! Changeset reconciliation
//!
//! Applies a materialized changeset table to a mirror table: deletes in one
//! batch, inserts as a bulk append, updates in a single pass keyed by
//! identifier. Inserts whose identifier is already present are skipped, so
//! replaying a window converges. The row count afterwards is checked against
//! `before - deletes + inserts`; a mismatch is reported, not raised.

use crate::adapters::store::FeatureStore;
use crate::domain::{ChangeKind, Feature, FieldValue, Result, CHANGE_TAG_COLUMN};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Columns never overwritten by updates besides the identifier
const PROTECTED_COLUMNS: &[&str] = &["objectid", "globalid", CHANGE_TAG_COLUMN];

/// Outcome of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// `expected - actual` row count when they differ
    pub count_mismatch: Option<i64>,
}

/// Changeset rows grouped by tag
#[derive(Debug, Default)]
pub struct PartitionedChanges {
    pub inserts: Vec<Feature>,
    pub updates: Vec<Feature>,
    pub deletes: Vec<Feature>,
    /// Rows whose tag matched no change kind
    pub unrecognized: usize,
}

impl PartitionedChanges {
    /// Groups rows by their change tag.
    ///
    /// `DELETE` matches in any case; `INSERT` and `UPDATE` only in upper case.
    pub fn partition(features: Vec<Feature>) -> Self {
        let mut changes = Self::default();
        for feature in features {
            match ChangeKind::of(&feature) {
                Some(ChangeKind::Insert) => changes.inserts.push(feature),
                Some(ChangeKind::Update) => changes.updates.push(feature),
                Some(ChangeKind::Delete) => changes.deletes.push(feature),
                None => changes.unrecognized += 1,
            }
        }
        changes
    }
}

pub struct Reconciler {
    store: Arc<dyn FeatureStore>,
    id_field: String,
}

impl Reconciler {
    pub fn new(store: Arc<dyn FeatureStore>, id_field: impl Into<String>) -> Self {
        Self {
            store,
            id_field: id_field.into().to_lowercase(),
        }
    }

    /// Merges the changeset in `source_table` into `mirror_table`
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(
        &self,
        source_table: &str,
        mirror_table: &str,
    ) -> Result<ReconciliationReport> {
        let before = self.store.row_count(mirror_table).await?;
        let changes = PartitionedChanges::partition(self.store.load_features(source_table).await?);

        tracing::info!(
            source = source_table,
            table = mirror_table,
            rows_before = before,
            inserts = changes.inserts.len(),
            updates = changes.updates.len(),
            deletes = changes.deletes.len(),
            "Applying changeset"
        );
        if changes.unrecognized > 0 {
            tracing::warn!(
                rows = changes.unrecognized,
                "Changeset rows with an unrecognized change tag were ignored"
            );
        }

        let mut report = ReconciliationReport::default();

        let delete_ids = self.identifiers(&changes.deletes);
        if !delete_ids.is_empty() {
            report.deleted = self
                .store
                .delete_where_in(mirror_table, &self.id_field, &delete_ids)
                .await?;
            tracing::debug!(deleted = report.deleted, "Deletes applied");
        }

        let expected_inserts = changes.inserts.len() as i64;
        if !changes.inserts.is_empty() {
            let inserts = self.fresh_inserts(mirror_table, changes.inserts).await?;
            let inserts = self.remap_geometries(source_table, mirror_table, inserts).await?;
            if !inserts.is_empty() {
                report.inserted = self.store.append(mirror_table, &inserts).await?;
            }
            tracing::debug!(inserted = report.inserted, "Inserts applied");
        }

        if !changes.updates.is_empty() {
            report.updated = self.apply_updates(source_table, mirror_table, changes.updates).await?;
            tracing::debug!(updated = report.updated, "Updates applied");
        }

        let after = self.store.row_count(mirror_table).await?;
        let expected = before as i64 - delete_ids.len() as i64 + expected_inserts;
        if expected != after as i64 {
            let diff = expected - after as i64;
            tracing::warn!(
                expected,
                actual = after,
                diff,
                "Row count after reconciliation does not match the expected total"
            );
            report.count_mismatch = Some(diff);
        }

        tracing::info!(
            rows_after = after,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Changeset applied"
        );
        Ok(report)
    }

    fn identifier(&self, feature: &Feature) -> Option<i64> {
        let id = feature.get(&self.id_field).and_then(FieldValue::as_exact_i64);
        if id.is_none() {
            tracing::warn!(
                id_field = %self.id_field,
                value = ?feature.get(&self.id_field),
                "Change without a usable identifier ignored"
            );
        }
        id
    }

    fn identifiers(&self, features: &[Feature]) -> Vec<i64> {
        features.iter().filter_map(|f| self.identifier(f)).collect()
    }

    /// Drops inserts whose identifier is already in the mirror or repeats
    /// an earlier insert of the same batch
    async fn fresh_inserts(&self, mirror_table: &str, inserts: Vec<Feature>) -> Result<Vec<Feature>> {
        let mut seen: HashSet<i64> = self
            .store
            .load_features(mirror_table)
            .await?
            .iter()
            .filter_map(|f| f.get(&self.id_field).and_then(FieldValue::as_exact_i64))
            .collect();

        let mut skipped = Vec::new();
        let fresh: Vec<Feature> = inserts
            .into_iter()
            .filter(|f| match f.get(&self.id_field).and_then(FieldValue::as_exact_i64) {
                Some(id) if !seen.insert(id) => {
                    skipped.push(id);
                    false
                }
                _ => true,
            })
            .collect();

        if !skipped.is_empty() {
            tracing::warn!(
                table = mirror_table,
                skipped = skipped.len(),
                ids = ?skipped,
                "Inserts for identifiers already present were skipped"
            );
        }
        Ok(fresh)
    }

    /// Reprojects geometries when the changeset and mirror SRIDs differ
    async fn remap_geometries(
        &self,
        source_table: &str,
        mirror_table: &str,
        mut features: Vec<Feature>,
    ) -> Result<Vec<Feature>> {
        let source_srid = self.store.schema(source_table).await?.srid;
        let mirror_srid = self.store.schema(mirror_table).await?.srid;

        if let (Some(from), Some(to)) = (source_srid, mirror_srid) {
            if from != to {
                for feature in features.iter_mut() {
                    if let Some(geometry) = &feature.geometry {
                        feature.geometry = Some(self.store.project(geometry, from, to).await?);
                    }
                }
            }
        }
        Ok(features)
    }

    async fn apply_updates(
        &self,
        source_table: &str,
        mirror_table: &str,
        updates: Vec<Feature>,
    ) -> Result<u64> {
        let source_schema = self.store.schema(source_table).await?;
        let mirror_schema = self.store.schema(mirror_table).await?;

        let columns: Vec<String> = mirror_schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .filter(|name| {
                !name.eq_ignore_ascii_case(&self.id_field)
                    && !PROTECTED_COLUMNS.iter().any(|p| name.eq_ignore_ascii_case(p))
                    && source_schema.has_column(name)
            })
            .collect();

        let updates = self.remap_geometries(source_table, mirror_table, updates).await?;
        let rows: HashMap<i64, Feature> = updates
            .into_iter()
            .filter_map(|f| self.identifier(&f).map(|id| (id, f)))
            .collect();

        self.store
            .apply_updates(
                mirror_table,
                &self.id_field,
                &columns,
                mirror_schema.srid.is_some(),
                &rows,
            )
            .await
    }
}
