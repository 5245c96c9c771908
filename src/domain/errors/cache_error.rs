//! Cache error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache tiers and collaborators.
///
/// None of these reach callers of `resolve`; they are recovered and logged.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Persistent tier cannot be opened or queried.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persistent write rejected by the storage quota.
    #[error("storage quota exceeded: need {needed} bytes, limit is {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    /// Byte retrieval failed.
    #[error("network error: {0}")]
    Network(String),

    /// Byte retrieval did not finish in time.
    #[error("network timeout after {0:?}")]
    Timeout(Duration),

    /// I/O failure inside the persistent tier.
    #[error("io error: {0}")]
    Io(String),

    /// Persisted record could not be decoded.
    #[error("corrupt cache record: {0}")]
    Corrupt(String),
}

impl CacheError {
    /// Returns true for failures of the byte-retrieval path.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
