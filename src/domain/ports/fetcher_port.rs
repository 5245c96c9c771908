//! Port for retrieving raw bytes over the network.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Fetches the bytes behind a URL.
/// Fails with `CacheError::Network` on non-2xx responses or transport errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ByteFetcherPort: Send + Sync {
    /// Downloads `url` in full.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}
