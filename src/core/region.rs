//! Region filter
//!
//! An optional one-row extent table scopes a dataset to an area. The extent
//! is used three ways: buffered and sent with bulk export requests (the
//! export API crops features at the footprint, the buffer keeps edge
//! features whole), as a bbox on changeset queries, and unbuffered to delete
//! out-of-scope rows after every download.

use crate::adapters::store::FeatureStore;
use crate::domain::geometry::{envelope, to_geojson, WGS84};
use crate::domain::Result;
use geo::{Geometry, Rect};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Extent geometry together with its EPSG code
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeGeometry {
    pub geometry: Geometry<f64>,
    pub srid: u32,
}

/// Rows removed by [`RegionFilter::apply_post_filter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostFilterReport {
    pub outside_region: u64,
    pub not_matching: u64,
}

pub struct RegionFilter {
    store: Arc<dyn FeatureStore>,
    extent_table: String,
    default_srid: u32,
    sql_filter: Option<String>,
    scope: OnceCell<Option<ScopeGeometry>>,
}

impl RegionFilter {
    /// `default_srid` applies when the extent table does not record one
    pub fn new(
        store: Arc<dyn FeatureStore>,
        extent_table: impl Into<String>,
        default_srid: u32,
        sql_filter: Option<String>,
    ) -> Self {
        Self {
            store,
            extent_table: extent_table.into(),
            default_srid,
            sql_filter,
            scope: OnceCell::new(),
        }
    }

    /// Extent geometry, `None` in unscoped mode. Read once per filter.
    pub async fn compute_scope_geometry(&self) -> Result<Option<ScopeGeometry>> {
        let scope = self.scope.get_or_try_init(|| self.load_scope()).await?;
        Ok(scope.clone())
    }

    async fn load_scope(&self) -> Result<Option<ScopeGeometry>> {
        let Some(geometry) = self.store.extent_geometry(&self.extent_table).await? else {
            tracing::info!(table = %self.extent_table, "No extent geometry; running unscoped");
            return Ok(None);
        };
        let srid = self
            .store
            .schema(&self.extent_table)
            .await?
            .srid
            .unwrap_or(self.default_srid);
        tracing::debug!(table = %self.extent_table, srid, "Extent geometry loaded");
        Ok(Some(ScopeGeometry { geometry, srid }))
    }

    /// Envelope of `scope` grown by `buffer` map units, in EPSG:4326, as a
    /// GeoJSON polygon
    pub async fn to_buffered_request_geometry(
        &self,
        scope: &ScopeGeometry,
        buffer: f64,
    ) -> Result<serde_json::Value> {
        let bounds = envelope(&scope.geometry)?;
        let grown = Rect::new(
            (bounds.min().x - buffer, bounds.min().y - buffer),
            (bounds.max().x + buffer, bounds.max().y + buffer),
        );
        let polygon = Geometry::Polygon(grown.to_polygon());
        let projected = self.store.project(&polygon, scope.srid, WGS84).await?;
        Ok(serde_json::to_value(to_geojson(&projected))?)
    }

    /// `xmin,ymin,xmax,ymax,EPSG:4326` of the scope geometry
    pub async fn to_bbox_parameter(&self, scope: &ScopeGeometry) -> Result<String> {
        let projected = self
            .store
            .project(&scope.geometry, scope.srid, WGS84)
            .await?;
        let bounds = envelope(&projected)?;
        Ok(format!(
            "{},{},{},{},EPSG:{}",
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y,
            WGS84
        ))
    }

    /// Deletes rows of `table` outside the unbuffered extent, then rows
    /// failing the attribute filter. Running it twice removes nothing more.
    #[tracing::instrument(skip(self))]
    pub async fn apply_post_filter(&self, table: &str) -> Result<PostFilterReport> {
        let mut report = PostFilterReport::default();

        if let Some(scope) = self.compute_scope_geometry().await? {
            let table_srid = self.store.schema(table).await?.srid.unwrap_or(scope.srid);
            let region = self
                .store
                .project(&scope.geometry, scope.srid, table_srid)
                .await?;
            report.outside_region = self.store.delete_not_intersecting(table, &region).await?;
            tracing::info!(table, deleted = report.outside_region, "Deleted features outside the extent");
        }

        if let Some(predicate) = &self.sql_filter {
            report.not_matching = self.store.delete_not_matching(table, predicate).await?;
            tracing::info!(
                table,
                filter = %predicate,
                deleted = report.not_matching,
                "Deleted features not matching the attribute filter"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::MemoryStore;
    use crate::domain::{Column, Feature, FieldType, FieldValue, TableSchema};
    use geo::{point, polygon};

    fn square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ])
    }

    async fn store_with_extent() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new().with_projection(2193, WGS84, |c| geo::Coord {
            x: c.x / 10.0,
            y: c.y / 10.0,
        }));
        store
            .seed(
                "extent",
                TableSchema::new(vec![], Some(2193)),
                vec![Feature::new(Some(square()))],
            )
            .await
            .unwrap();
        store
    }

    fn pt(id: i64, x: f64, y: f64, class: &str) -> Feature {
        Feature::new(Some(Geometry::Point(point!(x: x, y: y))))
            .with("id", FieldValue::Integer(id))
            .with("class", FieldValue::Text(class.to_string()))
    }

    #[tokio::test]
    async fn test_unscoped_without_extent_table() {
        let store = Arc::new(MemoryStore::new());
        let filter = RegionFilter::new(store, "extent", 2193, None);
        assert!(filter.compute_scope_geometry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_buffered_request_geometry() {
        let store = store_with_extent().await;
        let filter = RegionFilter::new(store, "extent", 2193, None);
        let scope = filter.compute_scope_geometry().await.unwrap().unwrap();

        let json = filter.to_buffered_request_geometry(&scope, 10.0).await.unwrap();
        assert_eq!(json["type"], "Polygon");
        // (-10,-10)..(20,20) scaled by the registered projection
        let ring = json["coordinates"][0].as_array().unwrap();
        assert!(ring.iter().any(|c| c[0] == -1.0 && c[1] == -1.0));
        assert!(ring.iter().any(|c| c[0] == 2.0 && c[1] == 2.0));
    }

    #[tokio::test]
    async fn test_bbox_parameter() {
        let store = store_with_extent().await;
        let filter = RegionFilter::new(store, "extent", 2193, None);
        let scope = filter.compute_scope_geometry().await.unwrap().unwrap();

        assert_eq!(
            filter.to_bbox_parameter(&scope).await.unwrap(),
            "0,0,1,1,EPSG:4326"
        );
    }

    #[tokio::test]
    async fn test_post_filter_is_idempotent() {
        let store = store_with_extent().await;
        let schema = TableSchema::new(
            vec![
                Column::new("id", FieldType::Integer),
                Column::new("class", FieldType::Text),
            ],
            Some(2193),
        );
        store
            .seed(
                "layer_1",
                schema,
                vec![
                    pt(1, 5.0, 5.0, "road"),
                    pt(2, 50.0, 50.0, "road"),
                    pt(3, 6.0, 6.0, "track"),
                    Feature::new(None).with("id", FieldValue::Integer(4)),
                ],
            )
            .await
            .unwrap();

        let filter = RegionFilter::new(
            store.clone(),
            "extent",
            2193,
            Some("class = 'road'".to_string()),
        );

        let first = filter.apply_post_filter("layer_1").await.unwrap();
        assert_eq!(first.outside_region, 2);
        assert_eq!(first.not_matching, 1);

        let second = filter.apply_post_filter("layer_1").await.unwrap();
        assert_eq!(second, PostFilterReport::default());
        assert_eq!(store.row_count("layer_1").await.unwrap(), 1);
    }
}
