//! The remote job client trait and its HTTP implementation.
//!
//! The engine submits and polls jobs exclusively through
//! [`RemoteJobClient`], keeping the generation API a black box behind a
//! small discriminated result.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reelgen_core::task::JobSpec;
use reelgen_core::types::DbId;

use crate::api::{GenerationApi, GenerationApiError};
use crate::messages::CreateGenerationRequest;

/// State of a remote generation job, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobStatus {
    /// Accepted upstream, not yet executing.
    Queued,
    /// Executing. The API may report a coarse completion percentage.
    Running { progress_hint: Option<i16> },
    /// Finished; the video is available at `result_url`.
    Done { result_url: String },
    /// Failed upstream with a human-readable reason.
    Failed { reason: String },
}

/// Handle returned after a job is accepted upstream.
#[derive(Debug, Clone)]
pub struct RemoteJobHandle {
    /// Server-assigned job identifier.
    pub remote_job_id: String,
}

/// Errors surfaced by a remote job client implementation.
#[derive(Debug, thiserror::Error)]
pub enum RemoteClientError {
    /// The remote job id is unknown or has expired upstream.
    #[error("Remote job {0} not found upstream")]
    JobNotFound(String),

    /// The request failed (network error or non-2xx response).
    #[error("Generation API request failed: {0}")]
    Api(String),

    /// The API answered with a payload the client cannot interpret.
    #[error("Malformed generation API response: {0}")]
    InvalidResponse(String),
}

/// Submission and status polling against the generation API.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Submit a job. On success the job exists upstream and can be polled.
    async fn create(&self, spec: &JobSpec) -> Result<RemoteJobHandle, RemoteClientError>;

    /// Query the current state of a previously created job.
    async fn poll(&self, remote_job_id: &str) -> Result<RemoteJobStatus, RemoteClientError>;

    /// Re-attach internal tracking for a job after a restart.
    ///
    /// Returns `false` when the remote job is unknown or expired, in which
    /// case the caller must not keep polling it.
    async fn resume(&self, remote_job_id: &str, local_id: DbId) -> Result<bool, RemoteClientError>;
}

/// HTTP implementation of [`RemoteJobClient`] over [`GenerationApi`].
pub struct HttpRemoteClient {
    api: GenerationApi,
    /// Remote job id -> local task id correlations restored by `resume`.
    tracked: RwLock<HashMap<String, DbId>>,
}

impl HttpRemoteClient {
    pub fn new(api: GenerationApi) -> Self {
        Self {
            api,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Local task id previously attached to a remote job, if any.
    pub fn tracked_local_id(&self, remote_job_id: &str) -> Option<DbId> {
        self.tracked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(remote_job_id)
            .copied()
    }
}

#[async_trait]
impl RemoteJobClient for HttpRemoteClient {
    async fn create(&self, spec: &JobSpec) -> Result<RemoteJobHandle, RemoteClientError> {
        let request = CreateGenerationRequest {
            job_type: spec.job_type.clone(),
            parameters: spec.parameters.clone(),
            client_ref: uuid::Uuid::new_v4().to_string(),
        };

        let response = self
            .api
            .create_generation(&request)
            .await
            .map_err(map_api_error)?;

        tracing::info!(
            job_type = %spec.job_type,
            remote_job_id = %response.job_id,
            queue_position = ?response.queue_position,
            "Generation job accepted upstream",
        );

        Ok(RemoteJobHandle {
            remote_job_id: response.job_id,
        })
    }

    async fn poll(&self, remote_job_id: &str) -> Result<RemoteJobStatus, RemoteClientError> {
        match self.api.get_generation(remote_job_id).await {
            Ok(response) => response.into_status(),
            Err(e) if e.is_not_found() => {
                Err(RemoteClientError::JobNotFound(remote_job_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    remote_job_id,
                    local_id = ?self.tracked_local_id(remote_job_id),
                    error = %e,
                    "Generation status query failed",
                );
                Err(map_api_error(e))
            }
        }
    }

    async fn resume(&self, remote_job_id: &str, local_id: DbId) -> Result<bool, RemoteClientError> {
        match self.api.get_generation(remote_job_id).await {
            Ok(_) => {
                self.tracked
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(remote_job_id.to_string(), local_id);
                tracing::info!(
                    remote_job_id,
                    local_id,
                    "Re-attached tracking for remote job",
                );
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(remote_job_id, local_id, "Remote job no longer exists");
                Ok(false)
            }
            Err(e) => Err(map_api_error(e)),
        }
    }
}

fn map_api_error(e: GenerationApiError) -> RemoteClientError {
    RemoteClientError::Api(e.to_string())
}
