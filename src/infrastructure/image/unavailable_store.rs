//! Persistent tier stand-in used when durable storage cannot be opened.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::domain::entities::{CacheKey, PersistentEntry};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::PersistentStorePort;

/// Rejects every operation with `StorageUnavailable`, so the orchestrator
/// treats each read as a miss and drops each write.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    /// Creates a store that reports `reason` on every call.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> CacheResult<T> {
        Err(CacheError::StorageUnavailable(self.reason.clone()))
    }
}

#[async_trait]
impl PersistentStorePort for UnavailableStore {
    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<PersistentEntry>> {
        self.unavailable()
    }

    async fn put(&self, _key: &CacheKey, _payload: Bytes) -> CacheResult<()> {
        self.unavailable()
    }

    async fn delete(&self, _key: &CacheKey) -> CacheResult<()> {
        self.unavailable()
    }

    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> CacheResult<usize> {
        self.unavailable()
    }

    async fn clear(&self) -> CacheResult<()> {
        self.unavailable()
    }

    async fn count(&self) -> CacheResult<usize> {
        self.unavailable()
    }
}
