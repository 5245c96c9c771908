//! Pixcache - A two-tier image cache.
//!
//! This crate resolves image URLs through a bounded in-memory tier and a
//! disk-backed tier with time-based expiration, falling back to the network
//! and finally to the origin URL. Origin URLs are rewritten to a CDN form
//! before any lookup.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for storage, network and time.
pub mod infrastructure;

pub use infrastructure::image::{ImageCache, ImageCacheConfig};

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "pixcache";
