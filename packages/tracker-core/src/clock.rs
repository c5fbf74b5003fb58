//! Injectable UTC clock.
//!
//! Every causal timestamp in the tracker (the `ts` field of a [`crate::stamp::ChangeStamp`],
//! and machine heartbeats) is minted through a [`ClockSource`] rather than reading
//! the system clock directly, so tests can drive time deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds between `0001-01-01T00:00:00Z` and the Unix epoch. The wire
/// contract's `LastHeartbeatTimeUtc` field is anchored to the former (an
/// unset heartbeat round-trips as `"0001-01-01T00:00:00"`), so every
/// `ClockSource` is measured from that same origin; `SystemClock` shifts
/// `SystemTime::now()` by this constant rather than exposing raw Unix time.
pub const EPOCH_OFFSET_MILLIS: i64 = 62_135_596_800_000;

/// Abstraction over "now", expressed as milliseconds since `0001-01-01T00:00:00Z`.
///
/// Production code uses [`SystemClock`]; tests substitute [`VirtualClock`] to
/// advance time explicitly without sleeping.
pub trait ClockSource: Send + Sync {
    /// Current time, in milliseconds since `0001-01-01T00:00:00Z`.
    fn now_millis(&self) -> i64;
}

/// Default clock source, backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as i64
            + EPOCH_OFFSET_MILLIS
    }
}

/// A clock whose value is set explicitly by the test, never by wall-clock time.
#[derive(Debug, Default)]
pub struct VirtualClock {
    millis: AtomicI64,
}

impl VirtualClock {
    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    /// Advances the clock by `delta_millis` (may be negative, though callers
    /// should not rely on moving time backwards).
    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Sets the clock to an explicit value.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl ClockSource for VirtualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_positive() {
        assert!(SystemClock.now_millis() > 0);
    }

    #[test]
    fn virtual_clock_advances() {
        let clock = VirtualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(0);
        assert_eq!(clock.now_millis(), 0);
    }
}
