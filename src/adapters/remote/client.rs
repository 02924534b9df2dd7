//! HTTP client for the data service
//!
//! Implements [`ExportApi`] and [`ChangesetApi`] with reqwest. Nothing here
//! retries: a failed request surfaces as [`SyncError::Transport`] and the
//! caller decides what to do.

use super::api::{ChangesetApi, ChangesetQuery, ExportApi};
use super::models::{ExportRequest, ExportStatus, SubmittedExport, ValidationResponse};
use crate::config::RemoteConfig;
use crate::domain::ids::ExportJobId;
use crate::domain::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Proxy, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Data service client
pub struct RemoteClient {
    /// Client for API calls, bounded by the request timeout
    client: Client,
    /// Client for streamed downloads, bounded only by the connect timeout
    streaming: Client,
    config: RemoteConfig,
}

impl RemoteClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns an error if a proxy URL is invalid or the TLS backend cannot
    /// be initialised.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Self::builder(&config)?
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        let streaming = Self::builder(&config)?
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            streaming,
            config,
        })
    }

    fn builder(config: &RemoteConfig) -> Result<ClientBuilder> {
        let mut builder = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("geosync/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &config.http_proxy {
            builder = builder.proxy(Proxy::http(proxy).map_err(|e| {
                SyncError::Configuration(format!("Invalid http proxy '{proxy}': {e}"))
            })?);
        }
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(Proxy::https(proxy).map_err(|e| {
                SyncError::Configuration(format!("Invalid https proxy '{proxy}': {e}"))
            })?);
        }
        Ok(builder)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            "Authorization",
            format!("key {}", self.config.api_key.expose_secret().as_ref()),
        )
    }

    fn exports_url(&self) -> String {
        format!("{}exports/", self.config.api_url)
    }

    fn job_url(&self, job_id: &ExportJobId) -> String {
        format!("{}{}/", self.exports_url(), job_id)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("{what} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transport(format!(
                "{what} failed with status {status}: {body}"
            )));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("Failed to read {what} response: {e}")))?;
        serde_json::from_str(&body).map_err(|e| {
            SyncError::Transport(format!("Unparseable {what} response: {e}: {body}"))
        })
    }

    /// Streams a response body to a file, returning the bytes written
    async fn stream_to_file(mut response: Response, dest: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SyncError::Transport(format!("Download interrupted: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl ExportApi for RemoteClient {
    #[tracing::instrument(skip(self, request), fields(crs = %request.crs))]
    async fn validate(&self, request: &ExportRequest) -> Result<ValidationResponse> {
        let url = format!("{}validate/", self.exports_url());
        let response = self
            .send(self.client.post(&url).json(request), "Export validation")
            .await?;
        Self::json(response, "export validation").await
    }

    #[tracing::instrument(skip(self, request), fields(crs = %request.crs))]
    async fn submit(&self, request: &ExportRequest) -> Result<SubmittedExport> {
        let response = self
            .send(self.client.post(self.exports_url()).json(request), "Export submission")
            .await?;
        Self::json(response, "export submission").await
    }

    async fn status(&self, job_id: &ExportJobId) -> Result<ExportStatus> {
        let response = self
            .send(self.client.get(self.job_url(job_id)), "Export status")
            .await?;
        Self::json(response, "export status").await
    }

    fn download_url(&self, job_id: &ExportJobId) -> String {
        format!("{}download/", self.job_url(job_id))
    }

    #[tracing::instrument(skip(self), fields(job_id = %job_id, dest = %dest.display()))]
    async fn download_to(&self, job_id: &ExportJobId, dest: &Path) -> Result<u64> {
        let url = self.download_url(job_id);
        let response = self
            .send(self.streaming.get(&url), "Export download")
            .await?;
        Self::stream_to_file(response, dest).await
    }
}

#[async_trait]
impl ChangesetApi for RemoteClient {
    #[tracing::instrument(skip(self, query), fields(layer_id = %query.layer_id, dest = %dest.display()))]
    async fn fetch_changeset(&self, query: &ChangesetQuery, dest: &Path) -> Result<u64> {
        let response = self
            .authorized(self.streaming.get(&self.config.wfs_url).query(&query.params()))
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("Changeset request failed: {e}")))?;

        let status = response.status();
        let written = Self::stream_to_file(response, dest).await?;
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "Changeset request failed with status {status}; response saved to {}",
                dest.display()
            )));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;
    use crate::domain::ids::LayerId;
    use mockito::Matcher;
    use tempfile::TempDir;

    fn config(base: &str) -> RemoteConfig {
        RemoteConfig {
            api_key: secret_string("test-key".to_string()),
            api_url: format!("{base}/api/"),
            wfs_url: format!("{base}/wfs"),
            timeout_seconds: 5,
            connect_timeout_seconds: 5,
            http_proxy: None,
            https_proxy: None,
        }
    }

    fn request(base: &str) -> ExportRequest {
        ExportRequest::for_layer(
            &format!("{base}/api/"),
            LayerId::new(7).unwrap(),
            2193,
            "application/vnd.geo+json",
        )
    }

    #[tokio::test]
    async fn test_validate_sends_key_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/exports/validate/")
            .match_header("authorization", "key test-key")
            .with_status(200)
            .with_body(r#"{"items": [{"item": "x", "is_valid": true}]}"#)
            .create_async()
            .await;

        let client = RemoteClient::new(config(&server.url())).unwrap();
        let response = client.validate(&request(&server.url())).await.unwrap();

        mock.assert_async().await;
        assert!(response.rejections().is_empty());
    }

    #[tokio::test]
    async fn test_status_non_success_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/exports/99/")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = RemoteClient::new(config(&server.url())).unwrap();
        let err = client
            .status(&ExportJobId::new("99").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_status_unparseable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/exports/5/")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = RemoteClient::new(config(&server.url())).unwrap();
        let err = client
            .status(&ExportJobId::new("5").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let mut server = mockito::Server::new_async().await;
        let payload = vec![7u8; 20_000];
        server
            .mock("GET", "/api/exports/12/download/")
            .with_status(200)
            .with_body(payload.clone())
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("archive.zip");
        let client = RemoteClient::new(config(&server.url())).unwrap();
        let written = client
            .download_to(&ExportJobId::new("12").unwrap(), &dest)
            .await
            .unwrap();

        assert_eq!(written, 20_000);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_changeset_error_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/wfs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("typename".into(), "layer-7-changeset".into()),
                Matcher::UrlEncoded("request".into(), "GetFeature".into()),
            ]))
            .with_status(400)
            .with_body("<ExceptionReport/>")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("changes.json");
        let client = RemoteClient::new(config(&server.url())).unwrap();
        let query = ChangesetQuery {
            layer_id: LayerId::new(7).unwrap(),
            wkid: 2193,
            from: "2024-01-01T00:00:00Z".to_string(),
            to: "2024-01-02T00:00:00Z".to_string(),
            cql_filter: None,
            bbox: None,
        };

        let err = client.fetch_changeset(&query, &dest).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "<ExceptionReport/>");
    }
}
