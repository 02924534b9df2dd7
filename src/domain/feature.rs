//! Feature and table schema model
//!
//! The store-facing row model shared by the store adapters, the archive and
//! changeset readers, and the reconciler.

use chrono::{DateTime, NaiveDateTime};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wire format of date attributes in changesets.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Declared type of an attribute column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Double,
    Text,
    Date,
}

impl FieldType {
    /// Whether values of this type can be migrated to an integer column
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Double)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Text => "text",
            FieldType::Date => "date",
        };
        f.write_str(name)
    }
}

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Type this value would get if a column were inferred from it
    pub fn natural_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Integer(_) => Some(FieldType::Integer),
            FieldValue::Double(_) => Some(FieldType::Double),
            FieldValue::Text(_) => Some(FieldType::Text),
            FieldValue::Date(_) => Some(FieldType::Date),
        }
    }

    /// Exact integer view of the value, if it has one.
    ///
    /// Doubles qualify only when they carry no fractional part, which is how
    /// upstream encodes integer identifiers.
    pub fn as_exact_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Double(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
                    Some(*v as i64)
                } else {
                    None
                }
            }
            FieldValue::Text(s) => s.trim().parse::<i64>().ok().or_else(|| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|v| FieldValue::Double(v).as_exact_i64())
            }),
            _ => None,
        }
    }

    /// Converts the value to the given column type.
    pub fn coerce_to(&self, target: FieldType) -> Result<FieldValue, String> {
        if self.is_null() {
            return Ok(FieldValue::Null);
        }

        match target {
            FieldType::Integer => self
                .as_exact_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("cannot convert {self} to integer")),
            FieldType::Double => match self {
                FieldValue::Integer(v) => Ok(FieldValue::Double(*v as f64)),
                FieldValue::Double(v) => Ok(FieldValue::Double(*v)),
                FieldValue::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Double)
                    .map_err(|_| format!("cannot convert '{s}' to double")),
                _ => Err(format!("cannot convert {self} to double")),
            },
            FieldType::Text => Ok(FieldValue::Text(self.to_string())),
            FieldType::Date => match self {
                FieldValue::Date(d) => Ok(FieldValue::Date(*d)),
                FieldValue::Text(s) => parse_wire_date(s).map(FieldValue::Date),
                _ => Err(format!("cannot convert {self} to date")),
            },
        }
    }

    /// Builds a value from a GeoJSON property.
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    FieldValue::Integer(v)
                } else {
                    FieldValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// JSON representation used by the PostGIS adapter.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Integer(v) => serde_json::Value::from(*v),
            FieldValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Date(d) => serde_json::Value::String(d.format(WIRE_DATE_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("NULL"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{}", d.format(WIRE_DATE_FORMAT)),
        }
    }
}

/// Parses a date attribute in the changeset wire format.
///
/// RFC 3339 timestamps and zone-less ISO timestamps (as produced by
/// `to_jsonb` on a `timestamp` column) are accepted as well.
pub fn parse_wire_date(value: &str) -> Result<NaiveDateTime, String> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, WIRE_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|d| d.naive_utc()))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|_| format!("'{value}' is not a date in {WIRE_DATE_FORMAT} format"))
}

/// An attribute column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into().to_lowercase(),
            field_type,
        }
    }
}

/// Attribute columns plus the spatial reference of the geometry column
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    /// EPSG code of the geometry column, `None` for non-spatial tables
    pub srid: Option<u32>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>, srid: Option<u32>) -> Self {
        Self { columns, srid }
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Infers a schema from a batch of features.
    ///
    /// Integer columns widen to double when any value is fractional; any
    /// text value turns the column into text. Columns with only nulls are
    /// declared as text.
    pub fn infer(features: &[Feature], srid: Option<u32>) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut types: BTreeMap<String, Option<FieldType>> = BTreeMap::new();

        for feature in features {
            for (name, value) in &feature.attributes {
                let name = name.to_lowercase();
                let entry = types.entry(name.clone()).or_insert_with(|| {
                    order.push(name.clone());
                    None
                });
                *entry = widen(*entry, value.natural_type());
            }
        }

        let columns = order
            .into_iter()
            .map(|name| {
                let field_type = types
                    .get(&name)
                    .copied()
                    .flatten()
                    .unwrap_or(FieldType::Text);
                Column::new(name, field_type)
            })
            .collect();

        Self { columns, srid }
    }
}

fn widen(current: Option<FieldType>, next: Option<FieldType>) -> Option<FieldType> {
    match (current, next) {
        (None, t) | (t, None) => t,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(FieldType::Integer), Some(FieldType::Double))
        | (Some(FieldType::Double), Some(FieldType::Integer)) => Some(FieldType::Double),
        _ => Some(FieldType::Text),
    }
}

/// A row: attributes keyed by lowercase column name plus an optional geometry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub attributes: BTreeMap<String, FieldValue>,
    pub geometry: Option<Geometry<f64>>,
}

impl Feature {
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self {
            attributes: BTreeMap::new(),
            geometry,
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: &str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.attributes.insert(name.to_lowercase(), value);
    }

    /// Case-insensitive attribute lookup
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.attributes
            .get(name)
            .or_else(|| self.attributes.get(&name.to_lowercase()))
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.attributes.remove(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_identifier_coerces_to_integer() {
        let value = FieldValue::Double(42.0);
        assert_eq!(
            value.coerce_to(FieldType::Integer).unwrap(),
            FieldValue::Integer(42)
        );
        assert!(FieldValue::Double(42.5)
            .coerce_to(FieldType::Integer)
            .is_err());
    }

    #[test]
    fn test_text_coerces_to_integer_when_numeric() {
        assert_eq!(
            FieldValue::Text("17.0".into()).as_exact_i64(),
            Some(17)
        );
        assert_eq!(FieldValue::Text("abc".into()).as_exact_i64(), None);
    }

    #[test]
    fn test_wire_date_parsing() {
        let parsed = parse_wire_date("2024-03-01T10:20:30Z").unwrap();
        assert_eq!(parsed.to_string(), "2024-03-01 10:20:30");
        assert!(parse_wire_date("01/03/2024").is_err());
    }

    #[test]
    fn test_null_coerces_to_any_type() {
        for target in [
            FieldType::Integer,
            FieldType::Double,
            FieldType::Text,
            FieldType::Date,
        ] {
            assert_eq!(FieldValue::Null.coerce_to(target).unwrap(), FieldValue::Null);
        }
    }

    #[test]
    fn test_schema_inference_widens_types() {
        let features = vec![
            Feature::default()
                .with("ID", FieldValue::Integer(1))
                .with("name", FieldValue::Text("a".into()))
                .with("empty", FieldValue::Null),
            Feature::default()
                .with("id", FieldValue::Double(2.0))
                .with("name", FieldValue::Integer(3)),
        ];

        let schema = TableSchema::infer(&features, Some(2193));
        assert_eq!(schema.column("id").unwrap().field_type, FieldType::Double);
        assert_eq!(schema.column("NAME").unwrap().field_type, FieldType::Text);
        assert_eq!(schema.column("empty").unwrap().field_type, FieldType::Text);
        assert_eq!(schema.srid, Some(2193));
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(7)),
            FieldValue::Integer(7)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(7.0)),
            FieldValue::Double(7.0)
        );
    }
}
