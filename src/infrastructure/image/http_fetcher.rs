//! HTTP byte retrieval.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ByteFetcherPort;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches image bytes with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pixcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    fn map_error(&self, e: &reqwest::Error) -> CacheError {
        if e.is_timeout() {
            CacheError::Timeout(self.timeout)
        } else {
            CacheError::Network(format!("Request failed: {e}"))
        }
    }
}

#[async_trait]
impl ByteFetcherPort for HttpFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?;

        if !response.status().is_success() {
            return Err(CacheError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.map_error(&e))?;
        trace!(url = %url, size = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}
