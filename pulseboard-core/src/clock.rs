// pulseboard-core/src/clock.rs
//
// Dependency-injected wall clock. All timestamp comparisons and watermark
// math go through this trait instead of reading `Utc::now()` inline, so
// lateness/backpressure/segment-reevaluation behavior is deterministic
// under test.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock — wraps `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock — holds a fixed instant that advances only when told to.
/// Lets scenario tests script exact wall-clock advances (e.g. "advance the
/// clock by 24h+1m, trigger a re-evaluation").
pub struct TestClock {
    inner: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { inner: Mutex::new(start) }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.inner.lock().unwrap() = to;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_explicitly() {
        let start = Utc::now();
        let clock = TestClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
