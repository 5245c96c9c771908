//! Port definition for the persistent tier.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::domain::entities::{CacheKey, PersistentEntry};
use crate::domain::errors::CacheResult;

/// Durable key-value store mapping cache keys to raw bytes and a write time.
///
/// Plain `get` does not filter by age; callers decide what counts as expired.
/// Each call is atomic on its own; no cross-call locking is provided.
#[async_trait]
pub trait PersistentStorePort: Send + Sync {
    /// Reads an entry.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistentEntry>>;

    /// Upserts `payload` with `written_at = now`, replacing any previous entry.
    async fn put(&self, key: &CacheKey, payload: Bytes) -> CacheResult<()>;

    /// Removes a single entry. Missing entries are not an error.
    async fn delete(&self, key: &CacheKey) -> CacheResult<()>;

    /// Removes every entry written at or before `cutoff`, the same boundary
    /// `PersistentEntry::is_expired` applies with `cutoff = now - window`.
    /// Returns how many entries were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize>;

    /// Removes every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Returns the number of stored entries.
    async fn count(&self) -> CacheResult<usize>;

    /// Removes `key` only if it was still written at or before `cutoff`, so a
    /// fresh rewrite that landed in the meantime survives.
    async fn delete_if_older(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> CacheResult<bool> {
        match self.get(key).await? {
            Some(entry) if entry.written_at <= cutoff => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
