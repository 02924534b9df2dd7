//! Feature store abstraction
//!
//! The sync core never talks SQL. Everything it needs from the spatial
//! database goes through [`FeatureStore`], implemented by the PostGIS
//! adapter for real runs and by [`super::memory::MemoryStore`] in tests.

use crate::domain::{Column, Feature, Result, TableSchema};
use async_trait::async_trait;
use geo::Geometry;
use std::collections::HashMap;

/// Spatial tabular store holding mirror, changeset, target and extent tables
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Human-readable description of the backend for logs
    fn describe_backend(&self) -> String;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Names of all tables starting with `prefix`
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;

    /// Creates an empty table; fails if it already exists
    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()>;

    /// Drops a table if it exists
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Attribute columns and geometry SRID of a table
    async fn schema(&self, table: &str) -> Result<TableSchema>;

    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Every row of a table
    async fn load_features(&self, table: &str) -> Result<Vec<Feature>>;

    /// Appends rows, coercing attribute values to the table's column types.
    ///
    /// Attributes without a matching column are ignored; geometries are
    /// written in the table's SRID.
    async fn append(&self, table: &str, features: &[Feature]) -> Result<u64>;

    /// Removes every row, keeping the table and its schema
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Deletes rows whose `column` value is in `ids`. `ids` must not be empty.
    async fn delete_where_in(&self, table: &str, column: &str, ids: &[i64]) -> Result<u64>;

    /// Deletes rows whose geometry does not intersect `region`.
    /// Rows without geometry are deleted as well.
    async fn delete_not_intersecting(&self, table: &str, region: &Geometry<f64>) -> Result<u64>;

    /// Deletes rows for which `predicate` is not true
    async fn delete_not_matching(&self, table: &str, predicate: &str) -> Result<u64>;

    /// Overwrites `columns` (and the geometry when `geometry` is set) of
    /// every row whose `key` value appears in `rows`, in a single pass.
    async fn apply_updates(
        &self,
        table: &str,
        key: &str,
        columns: &[String],
        geometry: bool,
        rows: &HashMap<i64, Feature>,
    ) -> Result<u64>;

    async fn add_column(&self, table: &str, column: &Column) -> Result<()>;

    async fn drop_column(&self, table: &str, column: &str) -> Result<()>;

    /// Copies values from one column into another, converting to the
    /// destination column's type
    async fn copy_column(&self, table: &str, from: &str, to: &str) -> Result<()>;

    /// Creates (or recreates) a unique index named `index` on `column`
    async fn create_unique_index(&self, table: &str, column: &str, index: &str) -> Result<()>;

    /// Geometry of the first row of a one-row extent table, `None` when the
    /// table is missing or empty
    async fn extent_geometry(&self, table: &str) -> Result<Option<Geometry<f64>>>;

    /// Reprojects a geometry between EPSG codes
    async fn project(&self, geometry: &Geometry<f64>, from: u32, to: u32)
        -> Result<Geometry<f64>>;
}
