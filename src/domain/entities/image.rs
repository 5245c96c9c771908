//! Domain types for cached images.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Canonical, CDN-rewritten URL identifying an entry across all tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a new `CacheKey` from an already rewritten URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns a filesystem-safe digest of the key.
    #[must_use]
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Returns the inner URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// In-process object reference minted from cached bytes.
///
/// Equality is by `url`: two handles minted from identical bytes are still
/// distinct objects.
#[derive(Debug, Clone)]
pub struct ObjectHandle {
    /// Opaque `blob:` URL usable directly as an image source.
    pub url: String,
    /// Bytes kept alive for as long as the handle is registered.
    pub bytes: Bytes,
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for ObjectHandle {}

/// Displayable reference returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageHandle {
    /// Live object backed by cached bytes; must be released exactly once.
    Object(ObjectHandle),
    /// Unrewritten origin URL returned when every path failed.
    Fallback(String),
}

impl ImageHandle {
    /// Returns the string a renderer should use as the image source.
    #[must_use]
    pub fn src(&self) -> &str {
        match self {
            Self::Object(object) => &object.url,
            Self::Fallback(url) => url,
        }
    }

    /// Returns true if this is a degraded fallback.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.src())
    }
}

/// Where a resolved image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// Served from the in-process memory tier.
    Memory,
    /// Promoted from the persistent tier.
    Persistent,
    /// Downloaded from the network.
    Network,
    /// Every path failed; the origin URL was returned.
    Fallback,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Persistent => write!(f, "persistent"),
            Self::Network => write!(f, "network"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// Cache key the origin URL rewrote to.
    pub key: CacheKey,
    /// Handle to render.
    pub handle: ImageHandle,
    /// Tier that satisfied the request.
    pub source: ImageSource,
}

/// Raw bytes stored by the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentEntry {
    /// Entry key.
    pub key: CacheKey,
    /// Raw image bytes as fetched.
    pub payload: Bytes,
    /// When the payload was written.
    pub written_at: DateTime<Utc>,
}

impl PersistentEntry {
    /// Returns how old the entry is at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.written_at
    }

    /// Returns true once the entry's age reaches `window`. Equivalent to
    /// `written_at <= now - window`, the cutoff used for deletion.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.age(now) >= window
    }
}

/// Snapshot of tier occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    /// Entries in the memory tier.
    pub memory_count: usize,
    /// Entries in the persistent tier (0 when it cannot be queried).
    pub persistent_count: usize,
    /// Memory tier bound.
    pub memory_limit: usize,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory: {}/{} entries, persistent: {} entries",
            self.memory_count, self.memory_limit, self.persistent_count
        )
    }
}
