//! Port for reading the current time.

use chrono::{DateTime, Utc};

/// Time source used for write timestamps and expiration checks.
pub trait ClockPort: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}
