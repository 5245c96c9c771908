use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pixcache",
    version,
    about = "Two-tier image cache with CDN URL rewriting",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Maximum images held in memory.
    #[arg(long, env = "PIXCACHE_MEMORY_LIMIT", global = true)]
    pub memory_limit: Option<usize>,

    /// Persistent entry lifetime in milliseconds.
    #[arg(long, global = true)]
    pub expiration_window_ms: Option<u64>,

    /// Seconds between maintenance sweeps.
    #[arg(long, global = true)]
    pub sweep_interval_secs: Option<u64>,

    /// Network request timeout in seconds.
    #[arg(long, global = true)]
    pub fetch_timeout_secs: Option<u64>,

    /// Persistent cache directory.
    #[arg(long, value_name = "PATH", env = "PIXCACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// CDN base URL that origin URLs are rewritten onto.
    #[arg(long, global = true)]
    pub cdn_base: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Resolve URLs and print the handle and tier for each.
    Resolve {
        /// Origin URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Pre-populate both tiers with the given URLs.
    Warm {
        /// Origin URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print tier occupancy.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove a URL from both tiers.
    Invalidate {
        /// Origin URL.
        url: String,
    },
    /// Invalidate a URL and fetch it again.
    Refresh {
        /// Origin URL.
        url: String,
    },
    /// Remove every cached image.
    Clear,
    /// Delete expired persistent entries now.
    Sweep,
    /// Print the CDN form of a URL.
    Rewrite {
        /// Origin URL.
        url: String,
    },
}
