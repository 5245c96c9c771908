//! Port for creating and releasing displayable handles.

use bytes::Bytes;

use crate::domain::entities::ImageHandle;

/// Turns raw bytes into a live handle and reclaims it later.
///
/// Both operations are synchronous. `release` must be called exactly once per
/// materialized handle; releasing a `Fallback` handle is a no-op.
pub trait HandleFactoryPort: Send + Sync {
    /// Creates a handle backed by `bytes`.
    fn materialize(&self, bytes: Bytes) -> ImageHandle;

    /// Reclaims the resource behind `handle`.
    fn release(&self, handle: &ImageHandle);
}
