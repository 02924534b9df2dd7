//! PostGIS implementation of [`FeatureStore`]
//!
//! Every table has its attribute columns plus a `geom` geometry column.
//! Bulk writes ship rows as one JSONB array and unpack them server-side
//! with `jsonb_to_recordset`, so appends and updates are single statements
//! regardless of row count.

use super::client::PostgisClient;
use crate::adapters::store::FeatureStore;
use crate::domain::geometry::{parse_geojson, to_geojson_string};
use crate::domain::{Column, Feature, FieldType, FieldValue, Result, SyncError, TableSchema};
use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use geo::Geometry;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name of the geometry column in every table
pub const GEOMETRY_COLUMN: &str = "geom";

/// Rows per INSERT statement
const APPEND_BATCH_SIZE: usize = 5000;

/// Feature store backed by PostgreSQL + PostGIS
pub struct PostgisStore {
    client: PostgisClient,
}

impl PostgisStore {
    pub fn new(client: PostgisClient) -> Self {
        Self { client }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(self.client.schema()), quote_ident(table))
    }

    async fn srid_of(&self, table: &str) -> Result<Option<u32>> {
        let rows = self
            .client
            .query(
                "SELECT srid FROM geometry_columns \
                 WHERE f_table_schema = $1 AND f_table_name = $2 AND f_geometry_column = $3",
                &[&self.client.schema(), &table, &GEOMETRY_COLUMN],
            )
            .await?;
        Ok(rows.first().map(|row| row.get::<_, i32>(0) as u32))
    }

    /// Serializes rows for `jsonb_to_recordset`, coercing to the table schema
    fn encode_rows<'a>(
        schema: &TableSchema,
        columns: &[&Column],
        key: Option<&str>,
        geometry: bool,
        rows: impl Iterator<Item = (Option<i64>, &'a Feature)>,
    ) -> Result<Value> {
        let mut encoded = Vec::new();
        for (id, feature) in rows {
            let mut object = Map::new();
            if let (Some(key), Some(id)) = (key, id) {
                object.insert(key.to_lowercase(), Value::from(id));
            }
            for column in columns {
                let value = feature
                    .get(&column.name)
                    .cloned()
                    .unwrap_or(FieldValue::Null)
                    .coerce_to(column.field_type)
                    .map_err(|e| SyncError::Storage(format!("column {}: {}", column.name, e)))?;
                object.insert(column.name.clone(), value.to_json());
            }
            if geometry && schema.srid.is_some() {
                let geom = match &feature.geometry {
                    Some(g) => Value::String(to_geojson_string(g)?),
                    None => Value::Null,
                };
                object.insert(GEOMETRY_COLUMN.to_string(), geom);
            }
            encoded.push(Value::Object(object));
        }
        Ok(Value::Array(encoded))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "bigint",
        FieldType::Double => "double precision",
        FieldType::Text => "text",
        FieldType::Date => "timestamp",
    }
}

fn field_type_of(data_type: &str) -> FieldType {
    match data_type {
        "smallint" | "integer" | "bigint" => FieldType::Integer,
        "real" | "double precision" | "numeric" => FieldType::Double,
        t if t.starts_with("timestamp") || t == "date" => FieldType::Date,
        _ => FieldType::Text,
    }
}

fn geometry_expr(srid: u32, source: &str) -> String {
    format!("ST_SetSRID(ST_GeomFromGeoJSON({source}), {srid})")
}

fn like_prefix(prefix: &str) -> String {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}%")
}

#[async_trait]
impl FeatureStore for PostgisStore {
    fn describe_backend(&self) -> String {
        format!("postgis {}", self.client.connection_string_safe())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&self.client.schema(), &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = like_prefix(prefix);
        let rows = self
            .client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name LIKE $2 ORDER BY table_name",
                &[&self.client.schema(), &pattern],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<_, String>(0))
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let mut definitions: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.field_type)))
            .collect();
        if let Some(srid) = schema.srid {
            definitions.push(format!(
                "{} geometry(Geometry, {srid})",
                quote_ident(GEOMETRY_COLUMN)
            ));
        }

        let statement = format!(
            "CREATE TABLE {} ({})",
            self.qualified(table),
            definitions.join(", ")
        );
        self.client.batch_execute(&statement).await?;
        tracing::debug!(table, columns = schema.columns.len(), "Table created");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", self.qualified(table)))
            .await
    }

    async fn schema(&self, table: &str) -> Result<TableSchema> {
        let rows = self
            .client
            .query(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&self.client.schema(), &table],
            )
            .await?;

        if rows.is_empty() {
            return Err(SyncError::Storage(format!("table {table} does not exist")));
        }

        let columns = rows
            .iter()
            .filter_map(|row| {
                let name: String = row.get(0);
                let data_type: String = row.get(1);
                if name == GEOMETRY_COLUMN || data_type == "USER-DEFINED" {
                    None
                } else {
                    Some(Column::new(name, field_type_of(&data_type)))
                }
            })
            .collect();

        Ok(TableSchema::new(columns, self.srid_of(table).await?))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", self.qualified(table)), &[])
            .await?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn load_features(&self, table: &str) -> Result<Vec<Feature>> {
        let schema = self.schema(table).await?;
        let geometry_select = if schema.srid.is_some() {
            format!("ST_AsGeoJSON(t.{})", quote_ident(GEOMETRY_COLUMN))
        } else {
            "NULL::text".to_string()
        };
        let query = format!(
            "SELECT to_jsonb(t) - '{GEOMETRY_COLUMN}', {geometry_select} FROM {} t",
            self.qualified(table)
        );

        let client = self.client.connection().await?;
        let stream = client
            .query_raw(query.as_str(), Vec::<String>::new())
            .await
            .map_err(|e| SyncError::Storage(format!("Query failed: {}", e)))?;
        pin_mut!(stream);

        let mut features = Vec::new();
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| SyncError::Storage(format!("Query failed: {}", e)))?
        {
            let attributes: Value = row.get(0);
            let geometry: Option<String> = row.get(1);

            let mut feature = Feature::new(match geometry {
                Some(text) => Some(parse_geojson(&text)?),
                None => None,
            });
            if let Value::Object(map) = attributes {
                for column in &schema.columns {
                    let raw = map.get(&column.name).unwrap_or(&Value::Null);
                    let value = FieldValue::from_json(raw)
                        .coerce_to(column.field_type)
                        .map_err(|e| SyncError::Storage(format!("column {}: {}", column.name, e)))?;
                    feature.set(&column.name, value);
                }
            }
            features.push(feature);
        }

        Ok(features)
    }

    async fn append(&self, table: &str, features: &[Feature]) -> Result<u64> {
        if features.is_empty() {
            return Ok(0);
        }

        let schema = self.schema(table).await?;
        let columns: Vec<&Column> = schema.columns.iter().collect();

        let mut targets: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let mut selects: Vec<String> = columns
            .iter()
            .map(|c| format!("r.{}", quote_ident(&c.name)))
            .collect();
        let mut record: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.field_type)))
            .collect();
        if let Some(srid) = schema.srid {
            targets.push(quote_ident(GEOMETRY_COLUMN));
            selects.push(geometry_expr(srid, &format!("r.{}", quote_ident(GEOMETRY_COLUMN))));
            record.push(format!("{} text", quote_ident(GEOMETRY_COLUMN)));
        }

        let statement = format!(
            "INSERT INTO {} ({}) SELECT {} FROM jsonb_to_recordset($1::jsonb) AS r({})",
            self.qualified(table),
            targets.join(", "),
            selects.join(", "),
            record.join(", ")
        );

        let mut inserted = 0;
        for chunk in features.chunks(APPEND_BATCH_SIZE) {
            let payload =
                Self::encode_rows(&schema, &columns, None, true, chunk.iter().map(|f| (None, f)))?;
            inserted += self.client.execute(&statement, &[&payload]).await?;
        }
        Ok(inserted)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.client
            .batch_execute(&format!("TRUNCATE TABLE {}", self.qualified(table)))
            .await
    }

    async fn delete_where_in(&self, table: &str, column: &str, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Err(SyncError::Storage(
                "delete_where_in called with an empty id list".to_string(),
            ));
        }
        let ids: Vec<i64> = ids.to_vec();
        self.client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ANY($1)",
                    self.qualified(table),
                    quote_ident(&column.to_lowercase())
                ),
                &[&ids],
            )
            .await
    }

    async fn delete_not_intersecting(&self, table: &str, region: &Geometry<f64>) -> Result<u64> {
        let srid = self.srid_of(table).await?.ok_or_else(|| {
            SyncError::Storage(format!("table {table} has no geometry column"))
        })?;
        let geom = quote_ident(GEOMETRY_COLUMN);
        let region_text = to_geojson_string(region)?;
        self.client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE {geom} IS NULL OR NOT ST_Intersects({geom}, {})",
                    self.qualified(table),
                    geometry_expr(srid, "$1")
                ),
                &[&region_text],
            )
            .await
    }

    async fn delete_not_matching(&self, table: &str, predicate: &str) -> Result<u64> {
        self.client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE ({}) IS NOT TRUE",
                    self.qualified(table),
                    predicate
                ),
                &[],
            )
            .await
    }

    async fn apply_updates(
        &self,
        table: &str,
        key: &str,
        columns: &[String],
        geometry: bool,
        rows: &HashMap<i64, Feature>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let schema = self.schema(table).await?;
        let mut targets = Vec::with_capacity(columns.len());
        for name in columns {
            targets.push(schema.column(name).ok_or_else(|| {
                SyncError::Storage(format!("column {name} does not exist in {table}"))
            })?);
        }
        let key = key.to_lowercase();

        let mut assignments: Vec<String> = targets
            .iter()
            .map(|c| format!("{0} = r.{0}", quote_ident(&c.name)))
            .collect();
        let mut record: Vec<String> = vec![format!("{} bigint", quote_ident(&key))];
        record.extend(
            targets
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.field_type))),
        );
        let geometry = geometry && schema.srid.is_some();
        if let (true, Some(srid)) = (geometry, schema.srid) {
            assignments.push(format!(
                "{} = {}",
                quote_ident(GEOMETRY_COLUMN),
                geometry_expr(srid, &format!("r.{}", quote_ident(GEOMETRY_COLUMN)))
            ));
            record.push(format!("{} text", quote_ident(GEOMETRY_COLUMN)));
        }

        if assignments.is_empty() {
            return Ok(0);
        }

        let statement = format!(
            "UPDATE {} AS t SET {} FROM jsonb_to_recordset($1::jsonb) AS r({}) WHERE t.{k} = r.{k}",
            self.qualified(table),
            assignments.join(", "),
            record.join(", "),
            k = quote_ident(&key)
        );
        let payload = Self::encode_rows(
            &schema,
            &targets,
            Some(&key),
            geometry,
            rows.iter().map(|(id, f)| (Some(*id), f)),
        )?;
        self.client.execute(&statement, &[&payload]).await
    }

    async fn add_column(&self, table: &str, column: &Column) -> Result<()> {
        self.client
            .batch_execute(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                self.qualified(table),
                quote_ident(&column.name),
                sql_type(column.field_type)
            ))
            .await
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        self.client
            .batch_execute(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.qualified(table),
                quote_ident(&column.to_lowercase())
            ))
            .await
    }

    async fn copy_column(&self, table: &str, from: &str, to: &str) -> Result<()> {
        let schema = self.schema(table).await?;
        let target = schema
            .column(to)
            .ok_or_else(|| SyncError::Storage(format!("column {to} does not exist in {table}")))?;
        let source = schema
            .column(from)
            .ok_or_else(|| SyncError::Storage(format!("column {from} does not exist in {table}")))?;

        // the bigint cast rounds, so fractions must be refused up front
        if target.field_type == FieldType::Integer && source.field_type == FieldType::Double {
            let row = self
                .client
                .query_one(&fractional_check_sql(&self.qualified(table), &source.name), &[])
                .await?;
            let fractional: i64 = row
                .try_get(0)
                .map_err(|e| SyncError::Storage(format!("Query failed: {}", e)))?;
            if fractional > 0 {
                return Err(SyncError::Storage(format!(
                    "{fractional} value(s) of {from} are not whole numbers"
                )));
            }
        }

        self.client
            .batch_execute(&format!(
                "UPDATE {} SET {} = {}::{}",
                self.qualified(table),
                quote_ident(&target.name),
                quote_ident(&from.to_lowercase()),
                sql_type(target.field_type)
            ))
            .await
    }

    async fn create_unique_index(&self, table: &str, column: &str, index: &str) -> Result<()> {
        self.client
            .batch_execute(&format!(
                "DROP INDEX IF EXISTS {}.{}; CREATE UNIQUE INDEX {} ON {} ({})",
                quote_ident(self.client.schema()),
                quote_ident(index),
                quote_ident(index),
                self.qualified(table),
                quote_ident(&column.to_lowercase())
            ))
            .await
    }

    async fn extent_geometry(&self, table: &str) -> Result<Option<Geometry<f64>>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT ST_AsGeoJSON({}) FROM {} LIMIT 1",
                    quote_ident(GEOMETRY_COLUMN),
                    self.qualified(table)
                ),
                &[],
            )
            .await?;
        match rows.first().and_then(|row| row.get::<_, Option<String>>(0)) {
            Some(text) => Ok(Some(parse_geojson(&text)?)),
            None => Ok(None),
        }
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
        let text = to_geojson_string(geometry)?;
        let (from, to) = (from as i32, to as i32);
        let row = self
            .client
            .query_one(
                "SELECT ST_AsGeoJSON(ST_Transform(ST_SetSRID(ST_GeomFromGeoJSON($1), $2), $3))",
                &[&text, &from, &to],
            )
            .await?;
        parse_geojson(&row.get::<_, String>(0))
    }
}

/// Counts the non-null values of `column` with a fractional part
fn fractional_check_sql(qualified_table: &str, column: &str) -> String {
    let column = quote_ident(&column.to_lowercase());
    format!(
        "SELECT count(*) FROM {qualified_table} WHERE {column} IS NOT NULL AND {column} <> trunc({column})"
    )
}
