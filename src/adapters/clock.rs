//! Time adapters.

use chrono::{DateTime, Utc};

use crate::ports::Clock;

/// System clock using the OS time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(timestamp_millis: i64) -> Self {
        Self {
            at: DateTime::from_timestamp_millis(timestamp_millis)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
