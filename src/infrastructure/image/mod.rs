//! Image caching infrastructure.
//!
//! This module provides:
//! - Origin to CDN URL rewriting
//! - Memory tier with insertion-order eviction
//! - Disk-backed persistent tier with TTL metadata
//! - Background sweeping of expired entries
//! - The retrieval orchestrator tying the tiers to the network

pub mod cdn_rewrite;
pub mod disk_cache;
pub mod http_fetcher;
pub mod loader;
pub mod memory_cache;
pub mod object_urls;
pub mod sweeper;
pub mod unavailable_store;

pub use cdn_rewrite::{CdnRewriter, DEFAULT_CDN_BASE, DEFAULT_ORIGIN_PATTERNS};
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache, default_cache_dir};
pub use http_fetcher::HttpFetcher;
pub use loader::{DEFAULT_EXPIRATION_WINDOW, ImageCache, ImageCacheConfig};
pub use memory_cache::{CacheStats, DEFAULT_MEMORY_LIMIT, MemoryImageCache};
pub use object_urls::ObjectUrlRegistry;
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, MaintenanceSweeper};
pub use unavailable_store::UnavailableStore;
