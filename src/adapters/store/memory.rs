//! In-memory feature store
//!
//! Keeps every table in a `HashMap` behind an async mutex. Used by the test
//! suite and handy for dry runs against small layers. Spatial filtering uses
//! `geo`; reprojection only works between identical EPSG codes unless a
//! transform has been registered with [`MemoryStore::register_projection`].

use super::predicate::Predicate;
use super::traits::FeatureStore;
use crate::domain::{Column, Feature, FieldValue, Result, SyncError, TableSchema};
use async_trait::async_trait;
use geo::{Coord, Geometry, Intersects, MapCoords};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

type CoordTransform = Box<dyn Fn(Coord<f64>) -> Coord<f64> + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct MemTable {
    schema: TableSchema,
    rows: Vec<Feature>,
    /// index name -> column
    unique_indexes: HashMap<String, String>,
}

impl MemTable {
    fn check_unique(&self, column: &str, rows: &[Feature]) -> Result<()> {
        let mut seen = HashSet::new();
        for row in rows {
            match row.get(column) {
                None | Some(FieldValue::Null) => {}
                Some(value) => {
                    if !seen.insert(value.to_string()) {
                        return Err(SyncError::Storage(format!(
                            "duplicate value {value} violates unique index on {column}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn coerce(&self, feature: &Feature) -> Result<Feature> {
        let mut row = Feature::new(feature.geometry.clone());
        for column in &self.schema.columns {
            let value = feature.get(&column.name).cloned().unwrap_or(FieldValue::Null);
            let value = value.coerce_to(column.field_type).map_err(|e| {
                SyncError::Storage(format!("column {}: {}", column.name, e))
            })?;
            row.set(&column.name, value);
        }
        Ok(row)
    }
}

/// Feature store living entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
    projections: HashMap<(u32, u32), CoordTransform>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a coordinate transform used by [`FeatureStore::project`]
    pub fn register_projection(
        &mut self,
        from: u32,
        to: u32,
        transform: impl Fn(Coord<f64>) -> Coord<f64> + Send + Sync + 'static,
    ) {
        self.projections.insert((from, to), Box::new(transform));
    }

    /// Builder form of [`MemoryStore::register_projection`]
    pub fn with_projection(
        mut self,
        from: u32,
        to: u32,
        transform: impl Fn(Coord<f64>) -> Coord<f64> + Send + Sync + 'static,
    ) -> Self {
        self.register_projection(from, to, transform);
        self
    }

    /// Creates a table from rows in one step
    pub async fn seed(&self, table: &str, schema: TableSchema, rows: Vec<Feature>) -> Result<()> {
        self.create_table(table, &schema).await?;
        self.append(table, &rows).await?;
        Ok(())
    }

    /// Names of the unique indexes on a table
    pub async fn unique_indexes(&self, table: &str) -> Result<Vec<(String, String)>> {
        let tables = self.tables.lock().await;
        let t = tables
            .get(table)
            .ok_or_else(|| missing_table(table))?;
        let mut indexes: Vec<(String, String)> = t
            .unique_indexes
            .iter()
            .map(|(name, column)| (name.clone(), column.clone()))
            .collect();
        indexes.sort();
        Ok(indexes)
    }
}

fn missing_table(table: &str) -> SyncError {
    SyncError::Storage(format!("table {table} does not exist"))
}

fn missing_column(table: &str, column: &str) -> SyncError {
    SyncError::Storage(format!("column {column} does not exist in {table}"))
}

#[async_trait]
impl FeatureStore for MemoryStore {
    fn describe_backend(&self) -> String {
        "in-memory".to_string()
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().await.contains_key(table))
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.contains_key(table) {
            return Err(SyncError::Storage(format!("table {table} already exists")));
        }
        tables.insert(
            table.to_string(),
            MemTable {
                schema: schema.clone(),
                ..MemTable::default()
            },
        );
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.tables.lock().await.remove(table);
        Ok(())
    }

    async fn schema(&self, table: &str) -> Result<TableSchema> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| missing_table(table))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| missing_table(table))
    }

    async fn load_features(&self, table: &str) -> Result<Vec<Feature>> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing_table(table))
    }

    async fn append(&self, table: &str, features: &[Feature]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let mut incoming = Vec::with_capacity(features.len());
        for feature in features {
            incoming.push(t.coerce(feature)?);
        }

        for column in t.unique_indexes.values() {
            let combined: Vec<Feature> = t.rows.iter().chain(incoming.iter()).cloned().collect();
            t.check_unique(column, &combined)?;
        }

        let count = incoming.len() as u64;
        t.rows.extend(incoming);
        Ok(count)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        t.rows.clear();
        Ok(())
    }

    async fn delete_where_in(&self, table: &str, column: &str, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Err(SyncError::Storage(
                "delete_where_in called with an empty id list".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        if !t.schema.has_column(column) {
            return Err(missing_column(table, column));
        }

        let wanted: HashSet<i64> = ids.iter().copied().collect();
        let before = t.rows.len();
        t.rows.retain(|row| {
            row.get(column)
                .and_then(FieldValue::as_exact_i64)
                .map_or(true, |id| !wanted.contains(&id))
        });
        Ok((before - t.rows.len()) as u64)
    }

    async fn delete_not_intersecting(&self, table: &str, region: &Geometry<f64>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let before = t.rows.len();
        t.rows.retain(|row| {
            row.geometry
                .as_ref()
                .is_some_and(|geometry| geometry.intersects(region))
        });
        Ok((before - t.rows.len()) as u64)
    }

    async fn delete_not_matching(&self, table: &str, predicate: &str) -> Result<u64> {
        let predicate = Predicate::parse(predicate)
            .map_err(|e| SyncError::Storage(format!("invalid predicate '{predicate}': {e}")))?;

        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let before = t.rows.len();
        t.rows.retain(|row| predicate.evaluate(row) == Some(true));
        Ok((before - t.rows.len()) as u64)
    }

    async fn apply_updates(
        &self,
        table: &str,
        key: &str,
        columns: &[String],
        geometry: bool,
        rows: &HashMap<i64, Feature>,
    ) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let mut targets = Vec::with_capacity(columns.len());
        for name in columns {
            let column = t
                .schema
                .column(name)
                .cloned()
                .ok_or_else(|| missing_column(table, name))?;
            targets.push(column);
        }

        let mut updated = 0u64;
        for row in t.rows.iter_mut() {
            let Some(id) = row.get(key).and_then(FieldValue::as_exact_i64) else {
                continue;
            };
            let Some(source) = rows.get(&id) else {
                continue;
            };

            for column in &targets {
                let value = source
                    .get(&column.name)
                    .cloned()
                    .unwrap_or(FieldValue::Null)
                    .coerce_to(column.field_type)
                    .map_err(|e| {
                        SyncError::Storage(format!("update of {} id {}: {}", column.name, id, e))
                    })?;
                row.set(&column.name, value);
            }
            if geometry {
                row.geometry = source.geometry.clone();
            }
            updated += 1;
        }

        Ok(updated)
    }

    async fn add_column(&self, table: &str, column: &Column) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        if t.schema.has_column(&column.name) {
            return Err(SyncError::Storage(format!(
                "column {} already exists in {table}",
                column.name
            )));
        }
        t.schema.columns.push(column.clone());
        for row in t.rows.iter_mut() {
            row.set(&column.name, FieldValue::Null);
        }
        Ok(())
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        if !t.schema.has_column(column) {
            return Err(missing_column(table, column));
        }
        t.schema
            .columns
            .retain(|c| !c.name.eq_ignore_ascii_case(column));
        for row in t.rows.iter_mut() {
            row.remove(column);
        }
        t.unique_indexes
            .retain(|_, indexed| !indexed.eq_ignore_ascii_case(column));
        Ok(())
    }

    async fn copy_column(&self, table: &str, from: &str, to: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        if !t.schema.has_column(from) {
            return Err(missing_column(table, from));
        }
        let target_type = t
            .schema
            .column(to)
            .map(|c| c.field_type)
            .ok_or_else(|| missing_column(table, to))?;

        for row in t.rows.iter_mut() {
            let value = row
                .get(from)
                .cloned()
                .unwrap_or(FieldValue::Null)
                .coerce_to(target_type)
                .map_err(|e| SyncError::Storage(format!("copy {from} -> {to}: {e}")))?;
            row.set(to, value);
        }
        Ok(())
    }

    async fn create_unique_index(&self, table: &str, column: &str, index: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        if !t.schema.has_column(column) {
            return Err(missing_column(table, column));
        }
        t.check_unique(column, &t.rows)?;
        t.unique_indexes
            .insert(index.to_string(), column.to_lowercase());
        Ok(())
    }

    async fn extent_geometry(&self, table: &str) -> Result<Option<Geometry<f64>>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .and_then(|t| t.rows.first())
            .and_then(|row| row.geometry.clone()))
    }

    async fn project(
        &self,
        geometry: &Geometry<f64>,
        from: u32,
        to: u32,
    ) -> Result<Geometry<f64>> {
        if from == to {
            return Ok(geometry.clone());
        }
        let transform = self.projections.get(&(from, to)).ok_or_else(|| {
            SyncError::Storage(format!(
                "no projection registered from EPSG:{from} to EPSG:{to}"
            ))
        })?;
        Ok(geometry.map_coords(|c| transform(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldType;
    use geo::{point, polygon};

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![
                Column::new("id", FieldType::Integer),
                Column::new("name", FieldType::Text),
            ],
            Some(2193),
        )
    }

    fn row(id: i64, name: &str, x: f64) -> Feature {
        Feature::new(Some(Geometry::Point(point!(x: x, y: 0.0))))
            .with("id", FieldValue::Integer(id))
            .with("name", FieldValue::Text(name.into()))
    }

    #[tokio::test]
    async fn test_append_coerces_and_ignores_unknown_columns() {
        let store = MemoryStore::new();
        store.create_table("t", &schema()).await.unwrap();

        let incoming = Feature::default()
            .with("id", FieldValue::Double(3.0))
            .with("extra", FieldValue::Text("dropped".into()));
        store.append("t", &[incoming]).await.unwrap();

        let rows = store.load_features("t").await.unwrap();
        assert_eq!(rows[0].get("id"), Some(&FieldValue::Integer(3)));
        assert_eq!(rows[0].get("name"), Some(&FieldValue::Null));
        assert!(rows[0].get("extra").is_none());
    }

    #[tokio::test]
    async fn test_delete_where_in_rejects_empty_list() {
        let store = MemoryStore::new();
        store.seed("t", schema(), vec![row(1, "a", 0.0)]).await.unwrap();
        assert!(store.delete_where_in("t", "id", &[]).await.is_err());
        assert_eq!(store.delete_where_in("t", "id", &[1, 9]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_not_intersecting() {
        let store = MemoryStore::new();
        store
            .seed("t", schema(), vec![row(1, "in", 5.0), row(2, "out", 50.0)])
            .await
            .unwrap();
        let region = Geometry::Polygon(polygon![
            (x: 0.0, y: -1.0),
            (x: 10.0, y: -1.0),
            (x: 10.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]);

        assert_eq!(store.delete_not_intersecting("t", &region).await.unwrap(), 1);
        assert_eq!(store.row_count("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let store = MemoryStore::new();
        store
            .seed("t", schema(), vec![row(1, "a", 0.0), row(1, "b", 0.0)])
            .await
            .unwrap();
        assert!(store.create_unique_index("t", "id", "id_idx2").await.is_err());
    }

    #[tokio::test]
    async fn test_project_requires_registered_transform() {
        let mut store = MemoryStore::new();
        let p = Geometry::Point(point!(x: 1.0, y: 2.0));
        assert!(store.project(&p, 2193, 4326).await.is_err());

        store.register_projection(2193, 4326, |c| Coord {
            x: c.x / 10.0,
            y: c.y / 10.0,
        });
        let projected = store.project(&p, 2193, 4326).await.unwrap();
        assert_eq!(projected, Geometry::Point(point!(x: 0.1, y: 0.2)));
    }
}
