//! Clock port - 時刻の抽象化

use chrono::{DateTime, Utc};

/// Clock は現在時刻を提供
///
/// Timestamps are persisted with millisecond precision, so `now_millis`
/// is what the engine records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// `now()` truncated to whole milliseconds.
    fn now_millis(&self) -> DateTime<Utc> {
        let now = self.now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant (tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
