//! Injectable time source for document timestamps.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Supplies `created_at` / `updated_at` timestamps.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A deterministic clock that advances one millisecond per reading.
///
/// Two successive writes therefore always get distinct, increasing
/// timestamps, which keeps `created_at < updated_at` assertions stable.
#[derive(Debug)]
pub struct TestClock {
    millis: AtomicI64,
}

impl TestClock {
    /// Start at 2009-02-13T23:31:30Z.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at_millis(1_234_567_890_000)
    }

    /// Start at the given Unix time in milliseconds.
    #[must_use]
    pub fn starting_at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.fetch_add(1, Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_per_reading() {
        let clock = TestClock::new();
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a.timestamp_millis(), 1_234_567_890_000);
        assert_eq!((b - a).num_milliseconds(), 1);
    }

    #[test]
    fn system_clock_is_recent() {
        let now = SystemClock.now();
        assert!(now.timestamp() > 1_600_000_000);
    }
}
