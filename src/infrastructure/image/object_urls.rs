//! Registry of in-process object URLs backing image handles.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::domain::entities::{ImageHandle, ObjectHandle};
use crate::domain::ports::HandleFactoryPort;

/// Default scope embedded in minted `blob:` URLs.
pub const DEFAULT_SCOPE: &str = "pixcache";

/// Mints `blob:` handles for byte payloads and keeps them alive until
/// released.
pub struct ObjectUrlRegistry {
    scope: String,
    live: Mutex<HashMap<String, Bytes>>,
}

impl ObjectUrlRegistry {
    /// Creates a registry minting URLs of the form `blob:{scope}/{uuid}`.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the bytes behind a live object URL.
    pub fn lookup(&self, url: &str) -> Option<Bytes> {
        self.live.lock().get(url).cloned()
    }

    /// Returns true if `url` has not been released.
    pub fn is_live(&self, url: &str) -> bool {
        self.live.lock().contains_key(url)
    }

    /// Returns how many object URLs are currently live.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for ObjectUrlRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE)
    }
}

impl HandleFactoryPort for ObjectUrlRegistry {
    fn materialize(&self, bytes: Bytes) -> ImageHandle {
        let url = format!("blob:{}/{}", self.scope, Uuid::new_v4());
        self.live.lock().insert(url.clone(), bytes.clone());
        trace!(url = %url, size = bytes.len(), "Minted object URL");
        ImageHandle::Object(ObjectHandle { url, bytes })
    }

    fn release(&self, handle: &ImageHandle) {
        let ImageHandle::Object(object) = handle else {
            return;
        };
        if self.live.lock().remove(&object.url).is_some() {
            trace!(url = %object.url, "Released object URL");
        } else {
            warn!(url = %object.url, "Object URL released twice");
        }
    }
}
