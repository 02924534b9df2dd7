//! Export job controller
//!
//! Drives one remote export through validate, submit, poll and download.
//! Polling is the only place this crate waits on upstream: it sleeps between
//! status checks and gives up at a deadline, handing back a `TimedOut` job
//! whose identifier can be passed to `--resume` later.

use super::job::{ExportJob, ExportJobState};
use crate::adapters::remote::{ExportApi, ExportRequest, RemoteState};
use crate::core::artifacts::{checksum_file, ArtifactHandle};
use crate::domain::ids::ExportJobId;
use crate::domain::{Result, SyncError};
use crate::log_artifact_written;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub struct ExportJobController {
    api: Arc<dyn ExportApi>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ExportJobController {
    pub fn new(api: Arc<dyn ExportApi>, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            api,
            poll_interval,
            max_wait,
        }
    }

    /// Dry-run validation; any rejected item fails the whole request
    #[tracing::instrument(skip(self, request))]
    pub async fn validate(&self, request: &ExportRequest) -> Result<()> {
        let response = self.api.validate(request).await?;
        let rejections = response.rejections();
        if rejections.is_empty() {
            tracing::debug!("Export parameters passed validation");
            return Ok(());
        }

        for reason in &rejections {
            tracing::error!(reason = %reason, "Export item rejected");
        }
        Err(SyncError::Validation(format!(
            "export request rejected: {}",
            rejections.join(", ")
        )))
    }

    /// Submits a validated request
    #[tracing::instrument(skip(self, request))]
    pub async fn submit(&self, request: &ExportRequest) -> Result<ExportJob> {
        let submitted_at = Utc::now();
        let submitted = self.api.submit(request).await?;
        let mut job = ExportJob::submitted(submitted.job_id()?, submitted_at);
        job.created_at = submitted.created_at;

        tracing::info!(job_id = %job.id, url = ?submitted.url, "Export submitted");
        Ok(job)
    }

    /// Polls until the job completes, fails or the deadline passes.
    ///
    /// A deadline is not an error: the job comes back `TimedOut`. Transport
    /// and parse failures end polling immediately.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn poll(&self, mut job: ExportJob) -> Result<ExportJob> {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            max_wait_secs = self.max_wait.as_secs(),
            "Polling export"
        );

        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            if started.elapsed() >= self.max_wait {
                job.state = ExportJobState::TimedOut;
                tracing::error!(
                    job_id = %job.id,
                    attempts = attempt,
                    "Polling reached the time limit; consider raising max_polling_time"
                );
                tracing::error!("You can resume polling for this export with --resume {}", job.id);
                return Ok(job);
            }

            attempt += 1;
            let status = self.api.status(&job.id).await?;
            job.record_progress(status.progress);
            job.remote_state = Some(status.state.clone());
            if job.created_at.is_none() {
                job.created_at = status.created_at;
            }

            match status.remote_state() {
                RemoteState::Complete => {
                    job.state = ExportJobState::Complete;
                    job.progress = 1.0;
                    job.download_url = Some(
                        status
                            .download_url
                            .clone()
                            .unwrap_or_else(|| self.api.download_url(&job.id)),
                    );
                    tracing::info!(attempt, "Export complete");
                    return Ok(job);
                }
                RemoteState::Failed => {
                    job.state = ExportJobState::Failed;
                    tracing::error!(attempt, state = %status.state, "Export failed upstream");
                    return Ok(job);
                }
                RemoteState::InProgress => {
                    job.state = ExportJobState::Polling;
                    tracing::debug!(
                        attempt,
                        progress = %format!("{:.2}", job.progress),
                        state = %status.state,
                        "Export in progress"
                    );
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Streams a complete job's archive to `dest`
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn download(&self, job: &ExportJob, dest: &Path) -> Result<ArtifactHandle> {
        if job.state != ExportJobState::Complete {
            return Err(SyncError::State(format!(
                "export {} is {} and cannot be downloaded",
                job.id, job.state
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = self.api.download_to(&job.id, dest).await?;
        let sha256 = checksum_file(dest).await?;
        log_artifact_written!(dest, bytes, sha256);

        Ok(ArtifactHandle {
            path: dest.to_path_buf(),
            bytes,
            sha256,
        })
    }

    /// Validates, submits and polls a new export
    pub async fn run(&self, request: &ExportRequest) -> Result<ExportJob> {
        self.validate(request).await?;
        let job = self.submit(request).await?;
        self.poll(job).await
    }

    /// Continues polling a job submitted by an earlier invocation
    pub async fn resume(&self, job_id: ExportJobId) -> Result<ExportJob> {
        tracing::info!(job_id = %job_id, "Resuming export");
        self.poll(ExportJob::resumed(job_id)).await
    }
}
