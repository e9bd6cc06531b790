//! REST wrapper for the generation API HTTP endpoints.
//!
//! Wraps job submission and status retrieval using [`reqwest`].

use crate::messages::{CreateGenerationRequest, CreateGenerationResponse, GenerationStatusResponse};

/// HTTP status code the API returns for unknown/expired jobs.
const STATUS_NOT_FOUND: u16 = 404;

/// HTTP client for one generation API deployment.
pub struct GenerationApi {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

/// Errors from the generation API REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl GenerationApiError {
    /// True when the error is the API's unknown-job response.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GenerationApiError::Api {
                status: STATUS_NOT_FOUND,
                ..
            }
        )
    }
}

impl GenerationApi {
    /// Create a new API client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `https://api.example.com`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_token: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_token(mut self, token: String) -> Self {
        self.api_token = Some(token);
        self
    }

    /// Queue a new generation job.
    ///
    /// Sends `POST /v1/generations` and returns the server-assigned job id
    /// and queue position.
    pub async fn create_generation(
        &self,
        request: &CreateGenerationRequest,
    ) -> Result<CreateGenerationResponse, GenerationApiError> {
        let mut req = self
            .client
            .post(format!("{}/v1/generations", self.base_url))
            .json(request);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        Self::parse_response(response).await
    }

    /// Fetch the current state of a generation job.
    ///
    /// Sends `GET /v1/generations/{job_id}`. Unknown or expired jobs come
    /// back as a 404 [`GenerationApiError::Api`].
    pub async fn get_generation(
        &self,
        job_id: &str,
    ) -> Result<GenerationStatusResponse, GenerationApiError> {
        let mut req = self
            .client
            .get(format!("{}/v1/generations/{}", self.base_url, job_id));
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`GenerationApiError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenerationApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
