//! Infrastructure layer with adapters for storage, network and time.

/// Wall-clock time source.
pub mod clock;
/// Application configuration.
pub mod config;
/// Image caching (tiers, rewriting, orchestration, sweeping).
pub mod image;

pub use clock::SystemClock;
pub use config::{AppConfig, CliArgs, Command, ConfigError, LogLevel, StorageManager};
pub use image::{
    CacheStats, CdnRewriter, DiskImageCache, HttpFetcher, ImageCache, ImageCacheConfig,
    MaintenanceSweeper, MemoryImageCache, ObjectUrlRegistry, UnavailableStore,
};
