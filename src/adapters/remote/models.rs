//! Data service API models
//!
//! Request and response bodies of the bulk export API, kept separate from the
//! domain so that upstream wire quirks (string-typed progress, missing
//! fields) are absorbed here.

use crate::domain::ids::{ExportJobId, LayerId};
use crate::domain::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Body of both the validation dry-run and the export submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Target CRS, e.g. `EPSG:2193`
    pub crs: String,
    pub items: Vec<ExportItem>,
    pub formats: ExportFormats,
    /// Export footprint as a GeoJSON geometry in EPSG:4326
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extent: Option<serde_json::Value>,
}

impl ExportRequest {
    /// Request for a single layer of the data service at `api_url`
    pub fn for_layer(api_url: &str, layer_id: LayerId, wkid: u32, format: &str) -> Self {
        Self {
            crs: format!("EPSG:{wkid}"),
            items: vec![ExportItem {
                item: format!("{api_url}layers/{layer_id}/"),
            }],
            formats: ExportFormats {
                vector: format.to_string(),
            },
            extent: None,
        }
    }

    pub fn with_extent(mut self, extent: serde_json::Value) -> Self {
        self.extent = Some(extent);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportItem {
    pub item: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFormats {
    pub vector: String,
}

/// Response of `exports/validate/`
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationResponse {
    #[serde(default)]
    pub items: Vec<ValidatedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatedItem {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reasons: Vec<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl ValidationResponse {
    /// Reasons of every rejected item, empty when all items are valid
    pub fn rejections(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| !item.is_valid)
            .map(|item| {
                let reasons: Vec<String> = item
                    .invalid_reasons
                    .iter()
                    .map(|r| match r {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                format!(
                    "{}: {}",
                    item.item.as_deref().unwrap_or("<unknown item>"),
                    if reasons.is_empty() {
                        "no reason given".to_string()
                    } else {
                        reasons.join("; ")
                    }
                )
            })
            .collect()
    }
}

/// Response of the export submission
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedExport {
    pub id: serde_json::Value,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl SubmittedExport {
    /// Export identifier; upstream sends it as a number
    pub fn job_id(&self) -> Result<ExportJobId> {
        let raw = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(SyncError::Transport(format!(
                    "Export submission returned an unusable id: {other}"
                )))
            }
        };
        ExportJobId::new(raw).map_err(SyncError::Transport)
    }
}

/// Response of `exports/{id}/`
#[derive(Debug, Clone, Deserialize)]
pub struct ExportStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Upstream state collapsed to what the job state machine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    InProgress,
    Complete,
    Failed,
}

impl ExportStatus {
    pub fn remote_state(&self) -> RemoteState {
        match self.state.to_ascii_lowercase().as_str() {
            "complete" => RemoteState::Complete,
            "error" | "cancelled" | "gone" => RemoteState::Failed,
            _ => RemoteState::InProgress,
        }
    }
}

/// Progress arrives as a number, a numeric string, an empty string or null
fn deserialize_progress<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let progress = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => 0.0,
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid progress '{s}'")))?,
        Some(serde_json::Value::Null) | None => 0.0,
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "invalid progress {other}"
            )))
        }
    };
    Ok(progress.clamp(0.0, 1.0))
}

/// Envelope fields of a changeset feature collection
#[derive(Debug, Clone, Deserialize)]
pub struct ChangesetEnvelope {
    #[serde(rename = "numberReturned", default)]
    pub number_returned: Option<serde_json::Value>,
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<String>,
}

impl ChangesetEnvelope {
    pub fn count(&self) -> Result<u64> {
        match &self.number_returned {
            None | Some(serde_json::Value::Null) => Ok(0),
            Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(|| {
                SyncError::Transport(format!("numberReturned is not a count: {n}"))
            }),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| SyncError::Transport(format!("numberReturned is not a count: {s}"))),
            Some(other) => Err(SyncError::Transport(format!(
                "numberReturned is not a count: {other}"
            ))),
        }
    }
}
