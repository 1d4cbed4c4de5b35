//! Clock port - Interface for time operations.

use chrono::{DateTime, Utc};

/// Port for getting the current time.
pub trait Clock: Send + Sync {
    /// Get the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Get the current Unix timestamp in milliseconds.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}
