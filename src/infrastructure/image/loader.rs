//! Image retrieval orchestrator.
//!
//! Implements a two-tier cache in front of the network:
//! Memory -> Persistent -> Network -> origin URL fallback.
//!
//! Concurrent `resolve` calls for the same key may each reach the network.
//! That costs bandwidth, not correctness: the first handle stored in the
//! memory tier wins and the last persistent write wins.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheStatus, ImageHandle, ImageSource, LoadedImage,
};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{
    ByteFetcherPort, ClockPort, HandleFactoryPort, PersistentStorePort,
};
use crate::infrastructure::clock::SystemClock;

use super::cdn_rewrite::CdnRewriter;
use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache, default_cache_dir};
use super::http_fetcher::{DEFAULT_TIMEOUT_SECS, HttpFetcher};
use super::memory_cache::{CacheStats, DEFAULT_MEMORY_LIMIT, MemoryImageCache};
use super::object_urls::ObjectUrlRegistry;
use super::sweeper::{DEFAULT_SWEEP_INTERVAL, MaintenanceSweeper, sweep_once};
use super::unavailable_store::UnavailableStore;

/// Default expiration window for persistent entries (7 days).
pub const DEFAULT_EXPIRATION_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for the image cache.
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Maximum handles in the memory tier.
    pub memory_limit: usize,
    /// Age at which persistent entries are treated as absent.
    pub expiration_window: Duration,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    /// Upper bound on a single network retrieval.
    pub fetch_timeout: Duration,
    /// Persistent tier directory; `None` uses the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Persistent tier quota in bytes.
    pub disk_quota: u64,
    /// Origin to CDN URL rewriting rules.
    pub rewriter: CdnRewriter,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            expiration_window: DEFAULT_EXPIRATION_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            fetch_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cache_dir: None,
            disk_quota: DEFAULT_MAX_CACHE_SIZE,
            rewriter: CdnRewriter::default(),
        }
    }
}

impl ImageCacheConfig {
    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expiration_window).unwrap_or(chrono::Duration::MAX)
    }
}

/// Two-tier image cache. Create one per process and share it by `Arc`.
pub struct ImageCache {
    config: ImageCacheConfig,
    window: chrono::Duration,
    memory: MemoryImageCache,
    store: Arc<dyn PersistentStorePort>,
    fetcher: Arc<dyn ByteFetcherPort>,
    handles: Arc<dyn HandleFactoryPort>,
    clock: Arc<dyn ClockPort>,
    sweeper: Mutex<Option<MaintenanceSweeper>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("memory_count", &self.memory.len())
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates a cache from explicit collaborators. No sweeper is started.
    #[must_use]
    pub fn new(
        config: ImageCacheConfig,
        store: Arc<dyn PersistentStorePort>,
        fetcher: Arc<dyn ByteFetcherPort>,
        handles: Arc<dyn HandleFactoryPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let memory = MemoryImageCache::new(config.memory_limit, handles.clone());
        Self {
            window: config.window(),
            config,
            memory,
            store,
            fetcher,
            handles,
            clock,
            sweeper: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Opens the production stack: disk tier, HTTP fetcher, object URL
    /// registry, system clock, and a running sweeper.
    ///
    /// If the disk tier cannot be opened the cache still works, with every
    /// persistent operation treated as a miss.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub async fn open(config: ImageCacheConfig) -> CacheResult<Self> {
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        let cache_dir = config.cache_dir.clone().unwrap_or_else(default_cache_dir);

        let store: Arc<dyn PersistentStorePort> =
            match DiskImageCache::open(cache_dir, config.disk_quota, clock.clone()).await {
                Ok(disk) => Arc::new(disk),
                Err(e) => {
                    warn!(error = %e, "Persistent image cache unavailable, continuing memory-only");
                    Arc::new(UnavailableStore::new(e.to_string()))
                }
            };

        let cache = Self::new(
            config,
            store,
            fetcher,
            Arc::new(ObjectUrlRegistry::default()),
            clock,
        );
        cache.start_sweeper();
        Ok(cache)
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &ImageCacheConfig {
        &self.config
    }

    /// Rewrites an origin URL to its cache key form.
    #[must_use]
    pub fn rewrite(&self, url: &str) -> String {
        self.config.rewriter.rewrite(url)
    }

    /// Resolves a URL to a displayable handle. Never fails: when every tier
    /// and the network fail, the unrewritten `origin_url` is returned.
    pub async fn resolve(&self, origin_url: &str) -> LoadedImage {
        let key = self.config.rewriter.key_for(origin_url);

        if let Some(handle) = self.memory.get(&key) {
            return LoadedImage {
                key,
                handle,
                source: ImageSource::Memory,
            };
        }

        if let Some(handle) = self.load_persistent(&key).await {
            let handle = self.memory.put(key.clone(), handle);
            debug!(key = %key, "Promoted image from persistent tier");
            return LoadedImage {
                key,
                handle,
                source: ImageSource::Persistent,
            };
        }

        match self.download(&key).await {
            Ok(bytes) => {
                let handle = self.handles.materialize(bytes.clone());
                let handle = self.memory.put(key.clone(), handle);
                self.persist_in_background(key.clone(), bytes);
                debug!(key = %key, source = "network", "Image loaded successfully");
                LoadedImage {
                    key,
                    handle,
                    source: ImageSource::Network,
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Image unavailable, falling back to origin URL");
                LoadedImage {
                    key,
                    handle: ImageHandle::Fallback(origin_url.to_string()),
                    source: ImageSource::Fallback,
                }
            }
        }
    }

    /// Resolves several URLs concurrently to populate both tiers.
    /// Returns how many resolved to a cached or downloaded image.
    pub async fn warm<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<S> = urls.into_iter().collect();
        let loaded = join_all(urls.iter().map(|url| self.resolve(url.as_ref()))).await;
        let warmed = loaded
            .iter()
            .filter(|image| image.source != ImageSource::Fallback)
            .count();
        info!(requested = urls.len(), warmed = warmed, "Warmed image cache");
        warmed
    }

    /// Removes a URL's entry from both tiers.
    ///
    /// Outstanding background writes are awaited first so a pending write
    /// cannot bring the entry back.
    pub async fn invalidate(&self, url: &str) {
        let key = self.config.rewriter.key_for(url);
        self.flush().await;

        self.memory.remove(&key);
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "Failed to delete persistent entry");
        }
        debug!(key = %key, "Invalidated image");
    }

    /// Clears both tiers, releasing every memory handle.
    pub async fn clear_all(&self) {
        self.flush().await;

        let released = self.memory.clear();
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear persistent tier");
        }
        info!(released = released, "Cleared all image caches");
    }

    /// Invalidates a URL, then resolves it again.
    pub async fn force_refresh(&self, url: &str) -> LoadedImage {
        self.invalidate(url).await;
        self.resolve(url).await
    }

    /// Reports tier occupancy. Never mutates a tier; a failing persistent
    /// tier reports zero entries.
    pub async fn status(&self) -> CacheStatus {
        let persistent_count = match self.store.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count persistent entries");
                0
            }
        };

        CacheStatus {
            memory_count: self.memory.len(),
            persistent_count,
            memory_limit: self.memory.limit(),
        }
    }

    /// Returns memory tier hit/miss statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Runs one maintenance sweep now.
    ///
    /// # Errors
    /// Returns the persistent tier's error if the sweep fails.
    pub async fn sweep_now(&self) -> CacheResult<usize> {
        sweep_once(self.store.as_ref(), self.clock.as_ref(), self.window).await
    }

    /// Starts the periodic sweeper if it is not already running.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(MaintenanceSweeper::is_running) {
            return;
        }
        *sweeper = Some(MaintenanceSweeper::start(
            self.store.clone(),
            self.clock.clone(),
            self.window,
            self.config.sweep_interval,
        ));
    }

    /// Waits for every outstanding background write and deletion.
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut *self.background.lock());
            if pending.is_empty() {
                break;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!(error = %e, "Background cache task ended abnormally");
                }
            }
        }
    }

    /// Stops the sweeper and waits for background work to finish.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.flush().await;
        debug!("Image cache shut down");
    }

    async fn load_persistent(&self, key: &CacheKey) -> Option<ImageHandle> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                trace!(key = %key, "Persistent tier miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent tier read failed, treating as miss");
                return None;
            }
        };

        let now = self.clock.now();
        if entry.is_expired(now, self.window) {
            debug!(key = %key, written_at = %entry.written_at, "Persistent entry expired");
            self.delete_in_background(key.clone(), now - self.window);
            return None;
        }

        Some(self.handles.materialize(entry.payload))
    }

    async fn download(&self, key: &CacheKey) -> CacheResult<Bytes> {
        debug!(key = %key, "Downloading image from network");
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch(key.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        }
    }

    fn persist_in_background(&self, key: CacheKey, bytes: Bytes) {
        let store = self.store.clone();
        self.track(tokio::spawn(async move {
            match store.put(&key, bytes).await {
                Ok(()) => {}
                Err(e @ CacheError::QuotaExceeded { .. }) => {
                    debug!(key = %key, error = %e, "Dropped persistent write");
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to persist image"),
            }
        }));
    }

    fn delete_in_background(&self, key: CacheKey, cutoff: chrono::DateTime<chrono::Utc>) {
        let store = self.store.clone();
        self.track(tokio::spawn(async move {
            if let Err(e) = store.delete_if_older(&key, cutoff).await {
                warn!(key = %key, error = %e, "Failed to delete expired entry");
            }
        }));
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut background = self.background.lock();
        background.retain(|task| !task.is_finished());
        background.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockByteFetcherPort;
    use crate::domain::ports::mocks::{ManualClock, MockPersistentStore};
    use tempfile::TempDir;

    const URL: &str = "https://store.example/a.jpg";

    struct Harness {
        cache: ImageCache,
        store: Arc<MockPersistentStore>,
        registry: Arc<ObjectUrlRegistry>,
        clock: Arc<ManualClock>,
    }

    fn harness(fetcher: MockByteFetcherPort) -> Harness {
        harness_with(ImageCacheConfig::default(), fetcher)
    }

    fn harness_with(config: ImageCacheConfig, fetcher: MockByteFetcherPort) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MockPersistentStore::new(clock.clone()));
        let registry = Arc::new(ObjectUrlRegistry::default());
        let cache = ImageCache::new(
            config,
            store.clone(),
            Arc::new(fetcher),
            registry.clone(),
            clock.clone(),
        );
        Harness {
            cache,
            store,
            registry,
            clock,
        }
    }

    fn fetcher_returning(times: usize) -> MockByteFetcherPort {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher
            .expect_fetch()
            .times(times)
            .returning(|_| Ok(Bytes::from_static(b"jpeg bytes")));
        fetcher
    }

    fn failing_fetcher() -> MockByteFetcherPort {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(CacheError::Network("HTTP 503".to_string())));
        fetcher
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::new(url)
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_once_and_fills_both_tiers() {
        let h = harness(fetcher_returning(1));

        let loaded = h.cache.resolve(URL).await;
        h.cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Network);
        assert!(!loaded.handle.is_fallback());
        let status = h.cache.status().await;
        assert_eq!(status.memory_count, 1);
        assert_eq!(status.persistent_count, 1);
        assert_eq!(status.memory_limit, 50);
    }

    #[tokio::test]
    async fn test_warm_cache_skips_network() {
        let h = harness(fetcher_returning(1));

        let first = h.cache.resolve(URL).await;
        let second = h.cache.resolve(URL).await;

        assert_eq!(second.source, ImageSource::Memory);
        assert_eq!(second.handle, first.handle);
    }

    #[tokio::test]
    async fn test_fetches_rewritten_url() {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://cdn.example.com/trips/b.png")
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"png")));
        let h = harness(fetcher);

        let loaded = h
            .cache
            .resolve("https://proj.supabase.co/storage/v1/object/public/trips/b.png?token=1")
            .await;

        assert_eq!(loaded.key, key("https://cdn.example.com/trips/b.png"));
        assert_eq!(loaded.source, ImageSource::Network);
    }

    #[tokio::test]
    async fn test_persistent_hit_is_promoted_to_memory() {
        let h = harness(fetcher_returning(0));
        h.store.insert_at(&key(URL), b"stored", h.clock.now()).await;

        let loaded = h.cache.resolve(URL).await;

        assert_eq!(loaded.source, ImageSource::Persistent);
        assert_eq!(
            h.registry.lookup(loaded.handle.src()),
            Some(Bytes::from_static(b"stored"))
        );
        assert_eq!(h.cache.status().await.memory_count, 1);
        assert!(h.store.contains(&key(URL)).await);
    }

    #[tokio::test]
    async fn test_entry_just_inside_window_is_a_hit() {
        let h = harness(fetcher_returning(0));
        let written_at = h.clock.now();
        h.store.insert_at(&key(URL), b"stored", written_at).await;

        h.clock.set(
            written_at + chrono::Duration::days(7) - chrono::Duration::milliseconds(1),
        );

        assert_eq!(h.cache.resolve(URL).await.source, ImageSource::Persistent);
    }

    #[tokio::test]
    async fn test_entry_at_exact_window_is_a_miss_and_deleted() {
        let h = harness(failing_fetcher());
        let written_at = h.clock.now();
        h.store.insert_at(&key(URL), b"stored", written_at).await;

        h.clock.set(written_at + chrono::Duration::days(7));
        let loaded = h.cache.resolve(URL).await;
        h.cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Fallback);
        assert!(!h.store.contains(&key(URL)).await);
    }

    #[tokio::test]
    async fn test_sweep_removes_entry_at_exact_window() {
        let h = harness(fetcher_returning(0));
        let written_at = h.clock.now();
        h.store.insert_at(&key(URL), b"stored", written_at).await;

        h.clock.set(written_at + chrono::Duration::days(7));

        assert_eq!(h.cache.sweep_now().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_deleted() {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(CacheError::Network("offline".to_string())));
        let h = harness(fetcher);
        let written_at = h.clock.now();
        h.store.insert_at(&key(URL), b"stale", written_at).await;

        h.clock.set(
            written_at + chrono::Duration::days(7) + chrono::Duration::milliseconds(1),
        );
        let loaded = h.cache.resolve(URL).await;
        h.cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Fallback);
        assert!(!h.store.contains(&key(URL)).await);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched_and_rewritten() {
        let h = harness(fetcher_returning(1));
        let written_at = h.clock.now();
        h.store.insert_at(&key(URL), b"stale", written_at).await;

        h.clock.advance(chrono::Duration::days(8));
        let loaded = h.cache.resolve(URL).await;
        h.cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Network);
        assert!(h.store.contains(&key(URL)).await);
        assert_eq!(h.store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_returns_origin_url() {
        let h = harness(failing_fetcher());

        let loaded = h.cache.resolve(URL).await;

        assert_eq!(loaded.source, ImageSource::Fallback);
        assert_eq!(loaded.handle, ImageHandle::Fallback(URL.to_string()));
        assert_eq!(h.cache.status().await.memory_count, 0);
    }

    #[tokio::test]
    async fn test_fallback_keeps_unrewritten_url() {
        let origin = "https://proj.supabase.co/storage/v1/object/public/x.jpg?sig=abc";
        let h = harness(failing_fetcher());

        let loaded = h.cache.resolve(origin).await;

        assert_eq!(loaded.handle.src(), origin);
        assert_eq!(loaded.key, key("https://cdn.example.com/x.jpg"));
    }

    #[tokio::test]
    async fn test_resolve_survives_unavailable_storage_and_network() {
        let h = harness(failing_fetcher());
        h.store.set_unavailable(true);

        let loaded = h.cache.resolve(URL).await;
        let status = h.cache.status().await;

        assert_eq!(loaded.handle.src(), URL);
        assert_eq!(status.persistent_count, 0);
    }

    #[tokio::test]
    async fn test_unavailable_storage_still_serves_network() {
        let h = harness(fetcher_returning(1));
        h.store.set_unavailable(true);

        let loaded = h.cache.resolve(URL).await;
        h.cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(h.store.put_count(), 0);
        assert_eq!(h.cache.resolve(URL).await.source, ImageSource::Memory);
    }

    struct StalledFetcher;

    #[async_trait::async_trait]
    impl ByteFetcherPort for StalledFetcher {
        async fn fetch(&self, _url: &str) -> CacheResult<Bytes> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out_to_fallback() {
        let clock = Arc::new(ManualClock::default());
        let config = ImageCacheConfig {
            fetch_timeout: Duration::from_secs(5),
            ..ImageCacheConfig::default()
        };
        let cache = ImageCache::new(
            config,
            Arc::new(MockPersistentStore::new(clock.clone())),
            Arc::new(StalledFetcher),
            Arc::new(ObjectUrlRegistry::default()),
            clock,
        );

        let loaded = cache.resolve(URL).await;

        assert_eq!(loaded.source, ImageSource::Fallback);
        assert_eq!(loaded.handle.src(), URL);
    }

    #[tokio::test]
    async fn test_invalidate_then_resolve_fetches_again() {
        let h = harness(fetcher_returning(2));

        h.cache.resolve(URL).await;
        h.cache.resolve(URL).await;
        h.cache.invalidate(URL).await;

        assert!(!h.store.contains(&key(URL)).await);
        assert_eq!(h.cache.status().await.memory_count, 0);
        assert_eq!(h.registry.live_count(), 0);

        let loaded = h.cache.resolve(URL).await;
        assert_eq!(loaded.source, ImageSource::Network);
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let h = harness(fetcher_returning(5));
        for i in 0..5 {
            h.cache.resolve(&format!("https://store.example/{i}.jpg")).await;
        }
        h.cache.flush().await;
        assert_eq!(h.cache.status().await.persistent_count, 5);

        h.cache.clear_all().await;

        let status = h.cache.status().await;
        assert_eq!(status.memory_count, 0);
        assert_eq!(status.persistent_count, 0);
        assert_eq!(h.registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_refetches() {
        let h = harness(fetcher_returning(2));

        let first = h.cache.resolve(URL).await;
        let refreshed = h.cache.force_refresh(URL).await;

        assert_eq!(refreshed.source, ImageSource::Network);
        assert_ne!(refreshed.handle, first.handle);
        assert!(!h.registry.is_live(first.handle.src()));
    }

    #[tokio::test]
    async fn test_memory_bound_holds_through_resolve() {
        let config = ImageCacheConfig {
            memory_limit: 3,
            ..ImageCacheConfig::default()
        };
        let h = harness_with(config, fetcher_returning(6));

        for i in 0..6 {
            h.cache.resolve(&format!("https://store.example/{i}.jpg")).await;
        }
        h.cache.flush().await;

        let status = h.cache.status().await;
        assert_eq!(status.memory_count, 3);
        assert_eq!(status.persistent_count, 6);
        assert_eq!(h.registry.live_count(), 3);

        let evicted = h.cache.resolve("https://store.example/0.jpg").await;
        assert_eq!(evicted.source, ImageSource::Persistent);
    }

    #[tokio::test]
    async fn test_warm_counts_successes() {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher.expect_fetch().returning(|url| {
            if url.ends_with("bad.jpg") {
                Err(CacheError::Network("HTTP 404: Not Found".to_string()))
            } else {
                Ok(Bytes::from_static(b"img"))
            }
        });
        let h = harness(fetcher);

        let warmed = h
            .cache
            .warm([
                "https://store.example/1.jpg",
                "https://store.example/2.jpg",
                "https://store.example/bad.jpg",
            ])
            .await;

        assert_eq!(warmed, 2);
        assert_eq!(h.cache.status().await.memory_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_all_get_handles() {
        let h = Arc::new(harness(fetcher_returning_any()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let h = h.clone();
                tokio::spawn(async move { h.cache.resolve(URL).await })
            })
            .collect();

        for task in tasks {
            let loaded = task.await.unwrap();
            assert!(!loaded.handle.is_fallback());
        }
        h.cache.flush().await;

        assert_eq!(h.cache.status().await.memory_count, 1);
        assert_eq!(h.registry.live_count(), 1);
    }

    fn fetcher_returning_any() -> MockByteFetcherPort {
        let mut fetcher = MockByteFetcherPort::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(Bytes::from_static(b"jpeg bytes")));
        fetcher
    }

    #[tokio::test]
    async fn test_sweep_now_purges_expired() {
        let h = harness(fetcher_returning(0));
        let now = h.clock.now();
        h.store
            .insert_at(&key("https://cdn.example.com/old.jpg"), b"o", now - chrono::Duration::days(10))
            .await;
        h.store
            .insert_at(&key("https://cdn.example.com/new.jpg"), b"n", now)
            .await;

        assert_eq!(h.cache.sweep_now().await.unwrap(), 1);
        assert_eq!(h.cache.status().await.persistent_count, 1);
    }

    #[tokio::test]
    async fn test_status_does_not_touch_tiers() {
        let h = harness(fetcher_returning(1));
        h.cache.resolve(URL).await;
        h.cache.flush().await;

        let before = h.cache.stats();
        let _ = h.cache.status().await;
        let after = h.cache.stats();

        assert_eq!(before.hits, after.hits);
        assert_eq!(before.misses, after.misses);
        assert_eq!(h.store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_survives_restart_with_disk_tier() {
        let temp_dir = TempDir::new().unwrap();
        let clock: Arc<dyn ClockPort> = Arc::new(ManualClock::default());
        let open_cache = |fetcher: MockByteFetcherPort| {
            let clock = clock.clone();
            let dir = temp_dir.path().to_path_buf();
            async move {
                let disk = DiskImageCache::open(dir, DEFAULT_MAX_CACHE_SIZE, clock.clone())
                    .await
                    .unwrap();
                ImageCache::new(
                    ImageCacheConfig::default(),
                    Arc::new(disk),
                    Arc::new(fetcher),
                    Arc::new(ObjectUrlRegistry::default()),
                    clock,
                )
            }
        };

        let first = open_cache(fetcher_returning(1)).await;
        assert_eq!(first.resolve(URL).await.source, ImageSource::Network);
        first.shutdown().await;
        drop(first);

        let second = open_cache(fetcher_returning(0)).await;
        assert_eq!(second.resolve(URL).await.source, ImageSource::Persistent);
        assert_eq!(second.resolve(URL).await.source, ImageSource::Memory);
    }

    #[tokio::test]
    async fn test_quota_exceeded_write_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let clock: Arc<dyn ClockPort> = Arc::new(ManualClock::default());
        let disk = DiskImageCache::open(temp_dir.path().to_path_buf(), 8, clock.clone())
            .await
            .unwrap();
        let cache = ImageCache::new(
            ImageCacheConfig::default(),
            Arc::new(disk),
            Arc::new(fetcher_returning(1)),
            Arc::new(ObjectUrlRegistry::default()),
            clock,
        );

        let loaded = cache.resolve(URL).await;
        cache.flush().await;

        assert_eq!(loaded.source, ImageSource::Network);
        let status = cache.status().await;
        assert_eq!(status.memory_count, 1);
        assert_eq!(status.persistent_count, 0);
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let h = harness(fetcher_returning(0));

        h.cache.start_sweeper();
        h.cache.start_sweeper();
        assert!(h.cache.sweeper.lock().as_ref().is_some_and(MaintenanceSweeper::is_running));

        h.cache.shutdown().await;
        assert!(h.cache.sweeper.lock().is_none());
    }
}
