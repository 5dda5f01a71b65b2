//! Collaborator seams consumed by the engine.
//!
//! Everything the engine touches beyond its own records sits behind one of
//! these traits: provider invocation, secret resolution, rate limiting,
//! and run persistence. Production implementations live in sibling
//! modules; tests script them.

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};
use skein_types::{ExecutionRun, Operation};
use thiserror::Error;

/// Result of a provider operation invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// HTTP-level status (or 200 for local operations).
    pub status: u16,
    /// Parsed response payload.
    pub body: JsonValue,
}

/// Failure classification for provider invocations.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The call did not complete in time.
    #[error("provider call timed out")]
    Timeout,
    /// Non-success response status.
    #[error("provider returned status {0}")]
    Status(u16),
    /// The rate limiter or provider rejected the call for throttling.
    #[error("provider call was rate limited")]
    RateLimited,
    /// Transport-level failure.
    #[error("network error calling provider: {0}")]
    Network(String),
    /// The operation cannot be invoked at all (no endpoint, bad template).
    #[error("operation is not invocable: {0}")]
    Invalid(String),
}

impl InvokeError {
    /// Transient failures are retried with backoff: timeouts, throttling,
    /// and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            InvokeError::Timeout | InvokeError::RateLimited => true,
            InvokeError::Status(status) => *status == 429 || *status >= 500,
            InvokeError::Network(_) | InvokeError::Invalid(_) => false,
        }
    }
}

/// Invokes provider operations with fully bound arguments.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    /// Performs one invocation attempt.
    async fn invoke(&self, operation: &Operation, arguments: &JsonMap<String, JsonValue>) -> Result<Invocation, InvokeError>;
}

/// Secret resolution failure.
#[derive(Debug, Clone, Error)]
#[error("secret '{name}' could not be resolved: {message}")]
pub struct SecretError {
    /// Placeholder name that failed.
    pub name: String,
    /// Backend-specific detail.
    pub message: String,
}

/// Resolves secret references into credential material.
///
/// Implementations access-log each resolution. The engine keeps resolved
/// material only inside a single step invocation and never persists it.
#[async_trait]
pub trait SecretsResolver: Send + Sync {
    /// Resolves one secret reference for the stated purpose.
    async fn resolve(&self, secret_ref: &str, purpose: &str) -> Result<String, SecretError>;
}

/// Per-provider throttling hook.
///
/// A rejection is treated exactly like a transient invocation failure.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Acquires permission to call the provider, or rejects with
    /// [`InvokeError::RateLimited`].
    async fn acquire(&self, provider_id: &str) -> Result<(), InvokeError>;
}

/// Pass-through limiter used when no throttling policy is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn acquire(&self, _provider_id: &str) -> Result<(), InvokeError> {
        Ok(())
    }
}

/// Run persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("run store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding failure.
    #[error("run store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Unknown run id.
    #[error("run '{run_id}' was not found")]
    NotFound {
        /// Requested run id.
        run_id: String,
    },
}

/// Durable storage for execution runs.
///
/// Must provide read-your-writes consistency for the owning run; the
/// engine persists every transition before evaluating the next step group.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a freshly created run.
    async fn create_run(&self, run: &ExecutionRun) -> Result<(), StoreError>;
    /// Persists the current state of a run.
    async fn save_run(&self, run: &ExecutionRun) -> Result<(), StoreError>;
    /// Loads a run by id.
    async fn load_run(&self, run_id: &str) -> Result<ExecutionRun, StoreError>;
    /// Lists run ids for a workflow, newest last.
    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_throttling_and_server_errors() {
        assert!(InvokeError::Timeout.is_transient());
        assert!(InvokeError::RateLimited.is_transient());
        assert!(InvokeError::Status(429).is_transient());
        assert!(InvokeError::Status(500).is_transient());
        assert!(InvokeError::Status(503).is_transient());

        assert!(!InvokeError::Status(404).is_transient());
        assert!(!InvokeError::Network("refused".into()).is_transient());
        assert!(!InvokeError::Invalid("no endpoint".into()).is_transient());
    }
}
