//! Watermark model
//!
//! The watermark is the instant up to which the mirror is known to reflect
//! upstream. The next changeset window starts there.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Serialized form: ISO-8601 with microseconds and a literal `Z`
const WATERMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Last synchronized instant of one dataset
///
/// # Examples
///
/// ```
/// use geosync::core::state::Watermark;
///
/// let watermark = Watermark::parse("2024-06-20T01:02:03.123456Z").unwrap();
/// assert_eq!(watermark.to_string(), "2024-06-20T01:02:03.123456Z");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(serialize_with = "serialize_instant", deserialize_with = "deserialize_instant")]
    last_updated: DateTime<Utc>,
}

impl Watermark {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            last_updated: instant,
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Parses a watermark from any of the timestamp shapes upstream emits:
    /// RFC 3339 with offset, or a zone-less ISO timestamp with a trailing `Z`.
    pub fn parse(value: &str) -> Result<Self, String> {
        parse_instant(value).map(Self::new)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.last_updated.format(WATERMARK_FORMAT))
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|n| n.and_utc())
        .map_err(|_| format!("'{value}' is not an ISO-8601 timestamp"))
}

fn serialize_instant<S: Serializer>(
    instant: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&instant.format(WATERMARK_FORMAT).to_string())
}

fn deserialize_instant<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_instant(&raw).map_err(serde::de::Error::custom)
}
