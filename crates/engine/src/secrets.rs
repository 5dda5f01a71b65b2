//! Secret resolution backends.
//!
//! Secret references in step parameters use `${secret:NAME}` placeholders.
//! Resolution happens per invocation and is access-logged here; the engine
//! never persists resolved material. The backend is selected with
//! `SKEIN_SECRETS_BACKEND` (`env` or the default OS keychain).

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::traits::{SecretError, SecretsResolver};

static KEYCHAIN_SERVICE: &str = "skein";

/// Environment variable selecting the secrets backend.
pub const SECRETS_BACKEND_ENV_VAR: &str = "SKEIN_SECRETS_BACKEND";

/// Secret resolution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    /// Resolve placeholders via the OS keychain.
    Keychain,
    /// Resolve placeholders from process environment variables.
    Environment,
}

impl SecretsBackend {
    /// Reads the configured backend from the environment.
    pub fn from_env() -> Self {
        match env::var(SECRETS_BACKEND_ENV_VAR).unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "env" => Self::Environment,
            _ => Self::Keychain,
        }
    }
}

/// Builds the resolver matching the configured backend.
pub fn resolver_from_env() -> Arc<dyn SecretsResolver> {
    match SecretsBackend::from_env() {
        SecretsBackend::Environment => Arc::new(EnvSecretsResolver),
        SecretsBackend::Keychain => Arc::new(KeyringSecretsResolver),
    }
}

/// Resolves secrets from process environment variables. Keychain-free, for
/// local development and CI.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretsResolver;

#[async_trait]
impl SecretsResolver for EnvSecretsResolver {
    async fn resolve(&self, secret_ref: &str, purpose: &str) -> Result<String, SecretError> {
        debug!(secret = secret_ref, purpose, backend = "env", "secret access");
        env::var(secret_ref).map_err(|error| SecretError {
            name: secret_ref.to_string(),
            message: error.to_string(),
        })
    }
}

/// Resolves secrets from the OS keychain.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecretsResolver;

#[async_trait]
impl SecretsResolver for KeyringSecretsResolver {
    async fn resolve(&self, secret_ref: &str, purpose: &str) -> Result<String, SecretError> {
        debug!(secret = secret_ref, purpose, backend = "keychain", "secret access");
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, secret_ref).map_err(|error| SecretError {
            name: secret_ref.to_string(),
            message: error.to_string(),
        })?;
        entry.get_password().map_err(|error| SecretError {
            name: secret_ref.to_string(),
            message: error.to_string(),
        })
    }
}
