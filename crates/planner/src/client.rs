//! Text-completion client abstraction.
//!
//! The external service is treated as unreliable and slow; this module
//! classifies failures so the planner can retry transient ones. Only the
//! minimal request/response contract is fixed here; the provider's richer
//! wire format is out of scope.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const COMPLETION_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure classification for completion calls.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// The request did not complete in time.
    #[error("completion request timed out")]
    Timeout,
    /// The service answered with a non-success status.
    #[error("completion service returned status {0}")]
    Status(u16),
    /// Transport-level failure.
    #[error("network error calling completion service: {0}")]
    Network(String),
    /// The response body did not match the expected contract.
    #[error("completion response was not readable: {0}")]
    Body(String),
}

impl CompletionError {
    /// Transient failures are worth retrying with backoff: timeouts,
    /// throttling, and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::Timeout => true,
            CompletionError::Status(status) => *status == 429 || *status >= 500,
            CompletionError::Network(_) | CompletionError::Body(_) => false,
        }
    }
}

/// Opaque text-completion provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Sends a prompt and returns the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// HTTP-backed completion client.
///
/// POSTs `{ "prompt": ... }` to the configured endpoint and expects
/// `{ "text": ... }` back.
pub struct HttpCompletionClient {
    http_client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

impl HttpCompletionClient {
    /// Creates a client against the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(COMPLETION_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        debug!(endpoint = %self.endpoint, prompt_bytes = prompt.len(), "sending completion request");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    CompletionError::Timeout
                } else {
                    CompletionError::Network(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status(status.as_u16()));
        }

        let body: CompletionResponse = response.json().await.map_err(|error| CompletionError::Body(error.to_string()))?;
        Ok(body.text)
    }
}
