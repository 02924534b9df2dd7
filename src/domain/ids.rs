//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers passed between the remote APIs,
//! the on-disk layout and the feature store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote layer identifier
///
/// The data service addresses layers by a positive integer. It appears in
/// export item URLs, WFS type names and local table names.
///
/// # Examples
///
/// ```
/// use geosync::domain::ids::LayerId;
/// use std::str::FromStr;
///
/// let layer = LayerId::from_str("50772").unwrap();
/// assert_eq!(layer.value(), 50772);
/// assert_eq!(layer.mirror_table(), "layer_50772");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct LayerId(u64);

impl LayerId {
    /// Creates a new LayerId, rejecting zero
    pub fn new(id: u64) -> Result<Self, String> {
        if id == 0 {
            return Err("Layer ID must be a positive integer".to_string());
        }
        Ok(Self(id))
    }

    /// Returns the numeric value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Name of the mirror table holding this layer
    pub fn mirror_table(&self) -> String {
        format!("layer_{}", self.0)
    }

    /// Prefix shared by every materialized changeset table of this layer
    pub fn changeset_table_prefix(&self) -> String {
        format!("layer_{}_changeset_", self.0)
    }

    /// WFS type name of the layer's changeset feed
    pub fn changeset_typename(&self) -> String {
        format!("layer-{}-changeset", self.0)
    }
}

impl TryFrom<u64> for LayerId {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LayerId> for u64 {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LayerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid layer ID '{s}': expected a positive integer"))?;
        Self::new(value)
    }
}

/// Export job identifier
///
/// Opaque to geosync; assigned by the remote export API and durable on the
/// remote side, which is what makes `--resume` possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportJobId(String);

impl ExportJobId {
    /// Creates a new ExportJobId from a string
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Export job ID cannot be empty".to_string());
        }
        Ok(Self(id.trim().to_string()))
    }

    /// Returns the job ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExportJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExportJobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Name of a configured dataset
///
/// Stored slugified so it can be used verbatim as a directory name.
///
/// # Examples
///
/// ```
/// use geosync::domain::ids::DatasetName;
///
/// let name = DatasetName::new("NZ Primary Parcels!").unwrap();
/// assert_eq!(name.as_str(), "nz-primary-parcels");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    /// Creates a new DatasetName, slugifying the input
    pub fn new(name: impl AsRef<str>) -> Result<Self, String> {
        let slug = slugify(name.as_ref());
        if slug.is_empty() {
            return Err(format!(
                "Dataset name '{}' contains no usable characters",
                name.as_ref()
            ));
        }
        Ok(Self(slug))
    }

    /// Returns the slug as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lowercases, drops punctuation and collapses whitespace/underscores/hyphens
/// into single hyphens.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_separator = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_layer_id_rejects_zero() {
        assert!(LayerId::new(0).is_err());
        assert!(LayerId::from_str("abc").is_err());
    }

    #[test]
    fn test_layer_id_names() {
        let layer = LayerId::new(50772).unwrap();
        assert_eq!(layer.mirror_table(), "layer_50772");
        assert_eq!(layer.changeset_table_prefix(), "layer_50772_changeset_");
        assert_eq!(layer.changeset_typename(), "layer-50772-changeset");
    }

    #[test]
    fn test_layer_id_serde_roundtrip_through_integer() {
        let layer: LayerId = serde_json::from_str("123").unwrap();
        assert_eq!(layer.value(), 123);
        assert!(serde_json::from_str::<LayerId>("0").is_err());
    }

    #[test]
    fn test_export_job_id_trims() {
        let id = ExportJobId::new("  981 ").unwrap();
        assert_eq!(id.as_str(), "981");
        assert!(ExportJobId::new("   ").is_err());
    }

    #[test_case("Hello World", "hello-world")]
    #[test_case("  NZ  Parcels__v2 ", "nz-parcels-v2")]
    #[test_case("roads (north)!", "roads-north")]
    #[test_case("already-slugged", "already-slugged")]
    fn test_slugify(input: &str, expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_dataset_name_rejects_empty_slug() {
        assert!(DatasetName::new("!!!").is_err());
    }
}
