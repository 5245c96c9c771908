//! Bounded in-memory handle cache with insertion-order eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, ImageHandle};
use crate::domain::ports::HandleFactoryPort;

/// Default maximum number of handles kept in memory.
pub const DEFAULT_MEMORY_LIMIT: usize = 50;

/// In-memory tier mapping cache keys to live handles.
///
/// Lookups never promote entries, so the backing `LruCache` evicts in
/// insertion order. Every removal path releases the handle it drops.
/// All operations are synchronous.
pub struct MemoryImageCache {
    entries: Mutex<LruCache<CacheKey, ImageHandle>>,
    limit: usize,
    handles: Arc<dyn HandleFactoryPort>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a tier holding at most `limit` entries (at least one).
    #[must_use]
    pub fn new(limit: usize, handles: Arc<dyn HandleFactoryPort>) -> Self {
        let cap = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            limit: cap.get(),
            handles,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the handle for `key` without changing eviction order.
    pub fn get(&self, key: &CacheKey) -> Option<ImageHandle> {
        let entries = self.entries.lock();
        if let Some(handle) = entries.peek(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(handle.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Inserts a handle and returns the one now resident for `key`.
    ///
    /// If `key` is already present the resident handle wins and `handle` is
    /// released. At capacity the oldest inserted entry is evicted first.
    pub fn put(&self, key: CacheKey, handle: ImageHandle) -> ImageHandle {
        let mut entries = self.entries.lock();

        if let Some(resident) = entries.peek(&key).cloned() {
            drop(entries);
            if resident != handle {
                self.handles.release(&handle);
            }
            trace!(key = %key, "Memory cache already holds key");
            return resident;
        }

        let evicted = if entries.len() >= self.limit {
            entries.pop_lru()
        } else {
            None
        };
        entries.put(key.clone(), handle.clone());
        drop(entries);

        if let Some((old_key, old_handle)) = evicted {
            self.handles.release(&old_handle);
            debug!(key = %old_key, "Evicted oldest entry from memory cache");
        }
        debug!(key = %key, "Stored handle in memory cache");

        handle
    }

    /// Removes and releases the oldest entry. Returns its key.
    pub fn evict_one(&self) -> Option<CacheKey> {
        let (key, handle) = self.entries.lock().pop_lru()?;
        self.handles.release(&handle);
        debug!(key = %key, "Evicted entry from memory cache");
        Some(key)
    }

    /// Removes and releases a single entry.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let Some(handle) = self.entries.lock().pop(key) else {
            return false;
        };
        self.handles.release(&handle);
        debug!(key = %key, "Removed entry from memory cache");
        true
    }

    /// Releases and removes every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<ImageHandle> = {
            let mut entries = self.entries.lock();
            std::iter::from_fn(|| entries.pop_lru().map(|(_, handle)| handle)).collect()
        };
        for handle in &drained {
            self.handles.release(handle);
        }
        debug!(count = drained.len(), "Cleared memory cache");
        drained.len()
    }

    /// Returns true if `key` is resident. Does not count as a hit.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains(key)
    }

    /// Returns the number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured bound.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }
}

impl Drop for MemoryImageCache {
    fn drop(&mut self) {
        for (_, handle) in self.entries.get_mut().iter() {
            self.handles.release(handle);
        }
    }
}

/// Statistics about memory tier performance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    /// Number of lookups served from memory.
    pub hits: u64,
    /// Number of lookups that missed memory.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of resident handles.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}
