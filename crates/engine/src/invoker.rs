//! HTTP-backed provider invoker.
//!
//! Builds real requests from an operation's HTTP binding: path template
//! segments are filled from bound arguments (percent-encoded), remaining
//! arguments travel as query parameters for bodyless methods or as a JSON
//! body otherwise.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map as JsonMap, Value as JsonValue};
use skein_types::Operation;
use skein_util::format_json_value;
use tracing::debug;
use url::Url;

use crate::traits::{Invocation, InvokeError, ProviderInvoker};

const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoker that dispatches operations to per-provider base URLs.
pub struct HttpProviderInvoker {
    http_client: reqwest::Client,
    base_urls: HashMap<String, Url>,
}

impl HttpProviderInvoker {
    /// Creates an invoker with no providers configured.
    pub fn new() -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(PROVIDER_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            base_urls: HashMap::new(),
        })
    }

    /// Registers the base URL for a provider.
    pub fn with_provider(mut self, provider_id: &str, base_url: &str) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url)?;
        self.base_urls.insert(provider_id.to_string(), parsed);
        Ok(self)
    }

    fn build_request_url(&self, operation: &Operation, arguments: &JsonMap<String, JsonValue>) -> Result<(Url, Vec<String>), InvokeError> {
        let base_url = self
            .base_urls
            .get(&operation.provider_id)
            .ok_or_else(|| InvokeError::Invalid(format!("no base URL configured for provider '{}'", operation.provider_id)))?;
        let http = operation
            .http
            .as_ref()
            .ok_or_else(|| InvokeError::Invalid(format!("operation '{}' has no HTTP binding", operation.qualified_name)))?;

        let mut consumed_fields = Vec::new();
        let mut filled_path = String::new();
        for segment in http.path.split('/') {
            if segment.is_empty() {
                continue;
            }
            filled_path.push('/');
            if let Some(field_name) = segment.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
                let value = arguments
                    .get(field_name)
                    .ok_or_else(|| InvokeError::Invalid(format!("path parameter '{field_name}' is not bound")))?;
                let rendered = format_json_value(value);
                filled_path.push_str(&utf8_percent_encode(&rendered, NON_ALPHANUMERIC).to_string());
                consumed_fields.push(field_name.to_string());
            } else {
                filled_path.push_str(segment);
            }
        }

        let url = base_url
            .join(filled_path.trim_start_matches('/'))
            .map_err(|error| InvokeError::Invalid(format!("invalid request path: {error}")))?;
        Ok((url, consumed_fields))
    }
}

#[async_trait]
impl ProviderInvoker for HttpProviderInvoker {
    async fn invoke(&self, operation: &Operation, arguments: &JsonMap<String, JsonValue>) -> Result<Invocation, InvokeError> {
        let (url, consumed_fields) = self.build_request_url(operation, arguments)?;
        let http = operation.http.as_ref().expect("checked by build_request_url");
        let method: reqwest::Method = http
            .method
            .parse()
            .map_err(|_| InvokeError::Invalid(format!("unsupported HTTP method '{}'", http.method)))?;

        let mut remaining: JsonMap<String, JsonValue> = arguments
            .iter()
            .filter(|(name, _)| !consumed_fields.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        debug!(operation = %operation.qualified_name, %url, method = %http.method, "invoking provider operation");

        let mut request = self.http_client.request(method.clone(), url);
        if method == reqwest::Method::GET || method == reqwest::Method::DELETE {
            let query: Vec<(String, String)> = remaining
                .iter()
                .map(|(name, value)| (name.clone(), format_json_value(value)))
                .collect();
            request = request.query(&query);
        } else {
            request = request.json(&std::mem::take(&mut remaining));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                InvokeError::Timeout
            } else {
                InvokeError::Network(error.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(InvokeError::RateLimited);
        }
        if !status.is_success() {
            return Err(InvokeError::Status(status.as_u16()));
        }

        let text = response.text().await.unwrap_or_default();
        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        };

        Ok(Invocation {
            status: status.as_u16(),
            body,
        })
    }
}
