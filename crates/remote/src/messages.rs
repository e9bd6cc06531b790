//! Generation API wire types.
//!
//! The API speaks JSON: `POST /v1/generations` queues a job and
//! `GET /v1/generations/{job_id}` reports its state. This module
//! deserializes those payloads and maps them into the engine-facing
//! [`RemoteJobStatus`].

use serde::{Deserialize, Serialize};

use crate::client::{RemoteClientError, RemoteJobStatus};

/// Request body for `POST /v1/generations`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateGenerationRequest {
    /// Kind of generation to run.
    pub job_type: String,
    /// Free-form generation parameters, forwarded unchanged.
    pub parameters: serde_json::Value,
    /// Client-generated reference for upstream idempotency/correlation.
    pub client_ref: String,
}

/// Response returned after successfully queuing a generation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGenerationResponse {
    /// Server-assigned identifier for the queued job.
    pub job_id: String,
    /// Position in the execution queue, when reported.
    #[serde(default)]
    pub queue_position: Option<i32>,
}

/// Remote-side job state as serialized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireJobState {
    Queued,
    Running,
    Done,
    Failed,
}

/// Response body of `GET /v1/generations/{job_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationStatusResponse {
    pub status: WireJobState,
    /// Completion percentage (0-100), when the API reports one.
    #[serde(default)]
    pub progress: Option<f32>,
    /// Download URL for the finished video. Present only for `done`.
    #[serde(default)]
    pub video_url: Option<String>,
    /// Failure description. Present only for `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerationStatusResponse {
    /// Map the wire payload into the engine-facing status.
    ///
    /// A `done` payload without a `video_url` is malformed -- the
    /// orchestrator must never mark a task completed without a result.
    pub fn into_status(self) -> Result<RemoteJobStatus, RemoteClientError> {
        match self.status {
            WireJobState::Queued => Ok(RemoteJobStatus::Queued),
            WireJobState::Running => Ok(RemoteJobStatus::Running {
                progress_hint: self
                    .progress
                    .map(|p| p.clamp(0.0, 100.0).round() as i16),
            }),
            WireJobState::Done => match self.video_url {
                Some(result_url) => Ok(RemoteJobStatus::Done { result_url }),
                None => Err(RemoteClientError::InvalidResponse(
                    "done status without video_url".to_string(),
                )),
            },
            WireJobState::Failed => Ok(RemoteJobStatus::Failed {
                reason: self
                    .error
                    .unwrap_or_else(|| "generation failed upstream".to_string()),
            }),
        }
    }
}
