//! GeoJSON encoding of `geo` geometries

use super::errors::SyncError;
use super::result::Result;
use geo::{BoundingRect, Geometry, Rect};

/// EPSG code of WGS 84 geographic coordinates.
pub const WGS84: u32 = 4326;

/// Converts a GeoJSON geometry object to a `geo` geometry.
pub fn from_geojson(geometry: geojson::Geometry) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from(geometry)
        .map_err(|e| SyncError::Serialization(format!("Unsupported GeoJSON geometry: {e}")))
}

/// Parses a GeoJSON geometry from its JSON text.
pub fn parse_geojson(text: &str) -> Result<Geometry<f64>> {
    let geometry: geojson::Geometry = serde_json::from_str(text)?;
    from_geojson(geometry)
}

/// Encodes a `geo` geometry as a GeoJSON geometry object.
pub fn to_geojson(geometry: &Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// Encodes a `geo` geometry as GeoJSON text.
pub fn to_geojson_string(geometry: &Geometry<f64>) -> Result<String> {
    Ok(serde_json::to_string(&to_geojson(geometry))?)
}

/// Envelope of a geometry, failing for empty geometries
pub fn envelope(geometry: &Geometry<f64>) -> Result<Rect<f64>> {
    geometry
        .bounding_rect()
        .ok_or_else(|| SyncError::Other("Geometry is empty and has no envelope".to_string()))
}
