//! Remote bootstrap endpoint client.
//!
//! One request per value: `GET <base>/url?key=<KEY>` answering
//! `{"value": "<string>"}`. The client never retries; the caller owns retry
//! policy.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::BootstrapError;

/// Anything that resolves named bootstrap values.
pub trait ConfigSource: Send + Sync + 'static {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<String, BootstrapError>> + Send;
}

#[derive(Deserialize)]
struct ValueResponse {
    value: String,
}

/// HTTP [`ConfigSource`] backed by `reqwest`.
///
/// Cheap to clone: `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct BootstrapClient {
    client: Client,
    endpoint: Url,
}

impl BootstrapClient {
    pub fn new(base_url: &Url, timeout_seconds: u64) -> Result<Self, BootstrapError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("url").map_err(|e| {
            BootstrapError::Network(format!("invalid bootstrap endpoint '{base_url}': {e}"))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| BootstrapError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Full endpoint URL without the `key` parameter.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", key);
        url
    }
}

impl ConfigSource for BootstrapClient {
    async fn fetch(&self, key: &str) -> Result<String, BootstrapError> {
        let url = self.request_url(key);
        debug!(%url, "fetching bootstrap value");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(key, error = %e, timeout = e.is_timeout(), "bootstrap request failed");
            if e.is_timeout() {
                BootstrapError::Network(format!("request for '{key}' timed out"))
            } else {
                BootstrapError::Network(format!("request for '{key}' failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::Network(format!(
                "bootstrap endpoint returned {status} for '{key}'"
            )));
        }

        let body = response.json::<ValueResponse>().await.map_err(|e| {
            if e.is_decode() {
                BootstrapError::Protocol(format!("malformed response for '{key}': {e}"))
            } else {
                BootstrapError::Network(format!("reading response for '{key}' failed: {e}"))
            }
        })?;

        let value = body.value.trim();
        if value.is_empty() {
            return Err(BootstrapError::Protocol(format!("empty value for '{key}'")));
        }
        debug!(key, len = value.len(), "bootstrap value resolved");
        Ok(value.to_string())
    }
}
