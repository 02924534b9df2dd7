//! Per-dataset configuration
//!
//! Every configured dataset has a directory `<data_directory>/<name>/` with a
//! `layer.toml` describing which remote layer it mirrors and how.

use crate::domain::ids::LayerId;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// File name of the per-dataset configuration
pub const LAYER_CONFIG_FILE: &str = "layer.toml";

/// Configuration of one mirrored layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Remote layer identifier
    pub layer_id: LayerId,

    /// Attribute holding the feature identifier
    pub id_field: String,

    /// EPSG code of the mirror
    #[serde(default = "default_wkid")]
    pub wkid: u32,

    /// Attribute predicate applied after every download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_filter: Option<String>,

    /// CQL filter sent to the changeset feed instead of a bbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cql_filter: Option<String>,

    /// Secondary table kept in step with the mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,

    /// Vector format requested from the export API
    #[serde(default = "default_export_format")]
    pub export_format: String,

    /// How many changesets and archives to keep when purging
    #[serde(default)]
    pub retain_after_purge: RetentionPolicy,

    /// Buffer in map units added around the extent for bulk exports
    #[serde(default = "default_initial_buffer")]
    pub initial_buffer: f64,

    /// Seconds between export status checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Seconds to keep polling before giving up
    #[serde(default = "default_max_polling_time")]
    pub max_polling_time: u64,
}

impl LayerConfig {
    /// Configuration with defaults for everything but the layer and id field
    pub fn new(layer_id: LayerId, id_field: impl Into<String>) -> Self {
        Self {
            layer_id,
            id_field: id_field.into(),
            wkid: default_wkid(),
            sql_filter: None,
            cql_filter: None,
            target_table: None,
            export_format: default_export_format(),
            retain_after_purge: RetentionPolicy::default(),
            initial_buffer: default_initial_buffer(),
            poll_interval: default_poll_interval(),
            max_polling_time: default_max_polling_time(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn max_polling_time(&self) -> Duration {
        Duration::from_secs(self.max_polling_time)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !crate::config::schema::is_identifier(&self.id_field) {
            return Err(format!(
                "id_field '{}' is not a valid column name",
                self.id_field
            ));
        }

        if self.wkid == 0 {
            return Err("wkid must be a positive EPSG code".to_string());
        }

        if let Some(target) = &self.target_table {
            if !crate::config::schema::is_identifier(target) {
                return Err(format!("target_table '{target}' is not a valid table name"));
            }
        }

        if matches!(&self.sql_filter, Some(f) if f.trim().is_empty()) {
            return Err("sql_filter cannot be blank; remove it instead".to_string());
        }

        if matches!(&self.cql_filter, Some(f) if f.trim().is_empty()) {
            return Err("cql_filter cannot be blank; remove it instead".to_string());
        }

        if !self.initial_buffer.is_finite() || self.initial_buffer < 0.0 {
            return Err(format!(
                "initial_buffer must be a non-negative number, got {}",
                self.initial_buffer
            ));
        }

        if self.poll_interval == 0 {
            return Err("poll_interval must be > 0".to_string());
        }

        if self.max_polling_time < self.poll_interval {
            return Err(format!(
                "max_polling_time ({}) must be at least poll_interval ({})",
                self.max_polling_time, self.poll_interval
            ));
        }

        Ok(())
    }
}

/// How many artifacts of each kind survive a purge
///
/// Written in TOML either as a non-negative integer or as the string
/// `"disabled"`. `Keep(0)` deletes everything; `Disabled` deletes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Disabled,
    Keep(usize),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Keep(5)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Disabled => f.write_str("disabled"),
            RetentionPolicy::Keep(n) => write!(f, "keep {n}"),
        }
    }
}

impl Serialize for RetentionPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RetentionPolicy::Disabled => serializer.serialize_str("disabled"),
            RetentionPolicy::Keep(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for RetentionPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PolicyVisitor;

        impl<'de> Visitor<'de> for PolicyVisitor {
            type Value = RetentionPolicy;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or \"disabled\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(RetentionPolicy::Keep(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom(format!(
                        "retain_after_purge must be >= 0, got {v}"
                    )));
                }
                Ok(RetentionPolicy::Keep(v as usize))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v.eq_ignore_ascii_case("disabled") {
                    Ok(RetentionPolicy::Disabled)
                } else {
                    Err(E::custom(format!(
                        "retain_after_purge must be an integer or \"disabled\", got '{v}'"
                    )))
                }
            }
        }

        deserializer.deserialize_any(PolicyVisitor)
    }
}

fn default_wkid() -> u32 {
    2193
}

fn default_export_format() -> String {
    "application/vnd.geo+json".to_string()
}

fn default_initial_buffer() -> f64 {
    1000.0
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_polling_time() -> u64 {
    600
}
