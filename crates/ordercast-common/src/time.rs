//! Clock abstraction for testable timing.
//!
//! Worker loops, retry scheduling, and circuit breaker cool-downs all
//! consult a `Clock` instead of the system time directly. Production code
//! uses `RealClock`; tests inject `TestClock` to step through retry windows
//! without sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, TimeZone, Utc};

/// Source of time for workers and policies.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// Production maps to `tokio::time::sleep`; test clocks may return
    /// immediately after advancing virtual time.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests.
///
/// Time only moves when `advance` or `jump_to` is called. `sleep` advances
/// the virtual clock by the requested duration and resolves immediately, so
/// worker loops can be driven through poll intervals without real delays.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Nanoseconds since `UNIX_EPOCH`.
    epoch_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            epoch_ns: Arc::new(AtomicU64::new(
                u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
            )),
        }
    }

    /// Creates a test clock starting at a specific timestamp.
    pub fn at(start: DateTime<Utc>) -> Self {
        let ns = start.timestamp_nanos_opt().unwrap_or(0).max(0);
        Self { epoch_ns: Arc::new(AtomicU64::new(u64::try_from(ns).unwrap_or(0))) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.epoch_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Jumps the clock to a specific timestamp.
    pub fn jump_to(&self, time: DateTime<Utc>) {
        let ns = time.timestamp_nanos_opt().unwrap_or(0).max(0);
        self.epoch_ns.store(u64::try_from(ns).unwrap_or(0), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let ns = self.epoch_ns.load(Ordering::Acquire);
        let secs = i64::try_from(ns / 1_000_000_000).unwrap_or(i64::MAX);
        let subsec = u32::try_from(ns % 1_000_000_000).unwrap_or(0);
        Utc.timestamp_opt(secs, subsec).single().unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let before = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - before, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_without_waiting() {
        let clock = TestClock::new();
        let before = clock.now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.now() - before, chrono::Duration::seconds(3600));
    }

    #[test]
    fn jump_to_sets_absolute_time() {
        let clock = TestClock::new();
        let target = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        clock.jump_to(target);

        assert_eq!(clock.now(), target);
    }
}
