//! Identifier normalization
//!
//! Upstream documents feature identifiers as integers, but GeoJSON exports
//! and changesets frequently carry them as doubles. Matching deletes and
//! updates against the mirror needs exact integer equality, so every table
//! is normalized to an integer identifier column with a unique index before
//! it takes part in reconciliation.

use crate::adapters::store::FeatureStore;
use crate::domain::{Column, FieldType, Result, SyncError};

/// Temporary column holding identifiers while the original is retyped
pub const SIDE_COLUMN: &str = "_uniqueIdentifier";

/// What [`normalize_identifier`] did to a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Column retyped to integer and indexed
    Converted,
    /// Column was already integer; index (re)built
    Indexed,
    /// Column absent or not numeric; table left untouched
    Skipped(String),
}

/// Name of the unique identifier index of `table`
pub fn identifier_index_name(table: &str, id_field: &str) -> String {
    format!("{}_{}_key", table, id_field.to_lowercase())
}

/// Ensures `id_field` in `table` is an integer column with a unique index.
///
/// Running it on an already normalized table only rebuilds the index.
#[tracing::instrument(skip(store))]
pub async fn normalize_identifier(
    store: &dyn FeatureStore,
    table: &str,
    id_field: &str,
) -> Result<NormalizeOutcome> {
    let schema = store.schema(table).await?;
    let index = identifier_index_name(table, id_field);

    let Some(column) = schema.column(id_field).cloned() else {
        let error = SyncError::Schema(format!("{id_field} not found in {table}"));
        tracing::warn!(error = %error, "Skipping identifier normalization");
        return Ok(NormalizeOutcome::Skipped(error.to_string()));
    };

    match column.field_type {
        FieldType::Integer => {
            store.create_unique_index(table, &column.name, &index).await?;
            tracing::info!(table, column = %column.name, "Identifier already integer; index rebuilt");
            Ok(NormalizeOutcome::Indexed)
        }
        FieldType::Double => {
            convert_to_integer(store, table, &column.name).await?;
            store.create_unique_index(table, &column.name, &index).await?;
            tracing::info!(table, column = %column.name, "Identifier converted to integer");
            Ok(NormalizeOutcome::Converted)
        }
        other => {
            let error = SyncError::Schema(format!(
                "{id_field} in {table} is {other}, not a number; cannot convert to integer"
            ));
            tracing::warn!(error = %error, "Skipping identifier normalization");
            Ok(NormalizeOutcome::Skipped(error.to_string()))
        }
    }
}

/// Side column, drop, recreate as integer, copy back
async fn convert_to_integer(store: &dyn FeatureStore, table: &str, column: &str) -> Result<()> {
    let side = Column::new(SIDE_COLUMN, FieldType::Integer);
    if store.schema(table).await?.has_column(&side.name) {
        // left behind by an interrupted run
        store.drop_column(table, &side.name).await?;
    }

    store.add_column(table, &side).await?;
    if let Err(e) = store.copy_column(table, column, &side.name).await {
        store.drop_column(table, &side.name).await?;
        return Err(SyncError::Schema(format!(
            "{column} in {table} holds non-integral identifiers: {e}"
        )));
    }

    store.drop_column(table, column).await?;
    store
        .add_column(table, &Column::new(column, FieldType::Integer))
        .await?;
    store.copy_column(table, &side.name, column).await?;
    store.drop_column(table, &side.name).await?;
    Ok(())
}
