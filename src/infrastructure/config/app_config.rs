//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use super::storage::ConfigError;
use crate::infrastructure::image::{
    CdnRewriter, DEFAULT_CDN_BASE, DEFAULT_MAX_CACHE_SIZE, DEFAULT_MEMORY_LIMIT,
    DEFAULT_ORIGIN_PATTERNS, ImageCacheConfig,
};

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration loaded from TOML and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache tier settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// URL rewrite settings.
    #[serde(default)]
    pub rewrite: RewriteSettings,
}

/// Cache tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum handles held in memory.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    /// Persistent entry lifetime in milliseconds.
    #[serde(default = "default_expiration_window_ms")]
    pub expiration_window_ms: u64,

    /// Seconds between maintenance sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Network request timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Persistent tier quota in bytes.
    #[serde(default = "default_disk_quota_bytes")]
    pub disk_quota_bytes: u64,

    /// Persistent tier directory. Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            expiration_window_ms: default_expiration_window_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            disk_quota_bytes: default_disk_quota_bytes(),
            cache_dir: None,
        }
    }
}

/// URL rewrite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteSettings {
    /// Prefix rewritten URLs are spliced onto.
    #[serde(default = "default_cdn_base")]
    pub cdn_base: String,

    /// Origin URL regexes, tried in order. A `path` capture group selects
    /// the part carried over; without one, the text after the match is used.
    #[serde(default = "default_origin_patterns")]
    pub origin_patterns: Vec<String>,
}

impl Default for RewriteSettings {
    fn default() -> Self {
        Self {
            cdn_base: default_cdn_base(),
            origin_patterns: default_origin_patterns(),
        }
    }
}

const fn default_memory_limit() -> usize {
    DEFAULT_MEMORY_LIMIT
}

const fn default_expiration_window_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

const fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

const fn default_fetch_timeout_secs() -> u64 {
    30
}

const fn default_disk_quota_bytes() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_cdn_base() -> String {
    DEFAULT_CDN_BASE.to_string()
}

fn default_origin_patterns() -> Vec<String> {
    DEFAULT_ORIGIN_PATTERNS
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(memory_limit) = args.memory_limit {
            self.cache.memory_limit = memory_limit;
        }
        if let Some(expiration_window_ms) = args.expiration_window_ms {
            self.cache.expiration_window_ms = expiration_window_ms;
        }
        if let Some(sweep_interval_secs) = args.sweep_interval_secs {
            self.cache.sweep_interval_secs = sweep_interval_secs;
        }
        if let Some(fetch_timeout_secs) = args.fetch_timeout_secs {
            self.cache.fetch_timeout_secs = fetch_timeout_secs;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(cdn_base) = &args.cdn_base {
            self.rewrite.cdn_base.clone_from(cdn_base);
        }
    }

    /// Builds the runtime cache configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPattern` if an origin pattern is not a
    /// valid regex.
    pub fn image_cache_config(&self) -> Result<ImageCacheConfig, ConfigError> {
        let rewriter = CdnRewriter::new(&self.rewrite.cdn_base, &self.rewrite.origin_patterns)?;

        Ok(ImageCacheConfig {
            memory_limit: self.cache.memory_limit,
            expiration_window: Duration::from_millis(self.cache.expiration_window_ms),
            sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
            fetch_timeout: Duration::from_secs(self.cache.fetch_timeout_secs),
            cache_dir: self.cache.cache_dir.clone(),
            disk_quota: self.cache.disk_quota_bytes,
            rewriter,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: LogLevel::Info,
            cache: CacheSettings::default(),
            rewrite: RewriteSettings::default(),
        }
    }
}
