//! Remote data service seams
//!
//! The export controller and changeset fetcher depend on these traits rather
//! than on the HTTP client, so tests can script upstream behaviour.

use super::models::{ExportRequest, ExportStatus, SubmittedExport, ValidationResponse};
use crate::domain::ids::{ExportJobId, LayerId};
use crate::domain::Result;
use async_trait::async_trait;
use std::path::Path;

/// Bulk export job API
#[async_trait]
pub trait ExportApi: Send + Sync {
    /// Dry-run validation of an export request
    async fn validate(&self, request: &ExportRequest) -> Result<ValidationResponse>;

    /// Submits an export job
    async fn submit(&self, request: &ExportRequest) -> Result<SubmittedExport>;

    /// Current status of a job
    async fn status(&self, job_id: &ExportJobId) -> Result<ExportStatus>;

    /// Where the finished archive of `job_id` is served from
    fn download_url(&self, job_id: &ExportJobId) -> String;

    /// Streams the finished archive to `dest`, returning the bytes written
    async fn download_to(&self, job_id: &ExportJobId, dest: &Path) -> Result<u64>;
}

/// Parameters of one changeset window query
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesetQuery {
    pub layer_id: LayerId,
    pub wkid: u32,
    /// Window start, the stored watermark
    pub from: String,
    /// Window end
    pub to: String,
    pub cql_filter: Option<String>,
    /// `xmin,ymin,xmax,ymax,EPSG:4326`; never sent together with a CQL filter
    pub bbox: Option<String>,
}

impl ChangesetQuery {
    /// Query string of the WFS GetFeature request
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("service", "WFS".to_string()),
            ("version", "2.0.0".to_string()),
            ("request", "GetFeature".to_string()),
            ("typename", self.layer_id.changeset_typename()),
            ("srsname", format!("EPSG:{}", self.wkid)),
            ("outputFormat", "json".to_string()),
        ];
        if let Some(cql) = &self.cql_filter {
            params.push(("cql_filter", cql.clone()));
        } else if let Some(bbox) = &self.bbox {
            params.push(("bbox", bbox.clone()));
        }
        params.push(("viewparams", format!("from:{};to:{}", self.from, self.to)));
        params
    }
}

/// Incremental changeset feed
#[async_trait]
pub trait ChangesetApi: Send + Sync {
    /// Streams the response body for `query` to `dest`, returning the bytes
    /// written. Error responses are written too before failing.
    async fn fetch_changeset(&self, query: &ChangesetQuery, dest: &Path) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> ChangesetQuery {
        ChangesetQuery {
            layer_id: LayerId::new(50772).unwrap(),
            wkid: 2193,
            from: "2024-01-01T00:00:00Z".to_string(),
            to: "2024-01-02T00:00:00Z".to_string(),
            cql_filter: None,
            bbox: Some("1,2,3,4,EPSG:4326".to_string()),
        }
    }

    #[test]
    fn test_params_include_bbox_and_window() {
        let params = query().params();
        assert!(params.contains(&("typename", "layer-50772-changeset".to_string())));
        assert!(params.contains(&("bbox", "1,2,3,4,EPSG:4326".to_string())));
        assert!(params.contains(&(
            "viewparams",
            "from:2024-01-01T00:00:00Z;to:2024-01-02T00:00:00Z".to_string()
        )));
    }

    #[test]
    fn test_cql_filter_suppresses_bbox() {
        let mut q = query();
        q.cql_filter = Some("status='current'".to_string());
        let params = q.params();
        assert!(params.iter().any(|(k, _)| *k == "cql_filter"));
        assert!(!params.iter().any(|(k, _)| *k == "bbox"));
    }
}
