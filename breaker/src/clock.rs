//! Injectable wall-clock and monotonic-clock sources.
//!
//! The shared store keys buckets by second-granularity UTC wall-clock time;
//! the recovery timer needs a monotonic clock that never jumps backwards.
//! Both are traits so tests can advance time deterministically instead of
//! sleeping real seconds.

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A second-truncated UTC timestamp, formatted `YYYY-MM-DDTHH:MM:SS` when
/// used as a shared-store bucket key.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// An opaque instant used only for duration arithmetic. Implementations must
/// be strictly non-decreasing within a process.
pub trait MonotonicClock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        now.trunc_subsecs(0)
    }
}

#[derive(Debug, Clone)]
pub struct SystemMonotonicClock {
    start: std::time::Instant,
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

/// A clock pair that can be advanced by hand; used in unit and scenario tests.
#[derive(Clone)]
pub struct ManualClock {
    wall: Arc<AtomicI64>,
    monotonic: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            wall: Arc::new(AtomicI64::new(start.timestamp())),
            monotonic: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Advances both the wall clock and the monotonic clock by `secs`.
    pub fn advance(&self, secs: i64) {
        self.wall.fetch_add(secs, Ordering::SeqCst);
        self.monotonic.fetch_add(secs, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.wall.load(Ordering::SeqCst), 0).expect("valid timestamp")
    }
}

impl MonotonicClock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.monotonic.load(Ordering::SeqCst).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_clocks_together() {
        let clock = ManualClock::new(Utc::now());
        let start_wall = clock.now();
        let start_mono = clock.now_secs();

        clock.advance(30);

        assert_eq!(clock.now_secs(), start_mono + 30);
        assert_eq!((clock.now() - start_wall).num_seconds(), 30);
    }

    #[test]
    fn system_wall_clock_truncates_to_the_second() {
        let clock = SystemWallClock;
        let now = clock.now();
        assert_eq!(now.timestamp_subsec_nanos(), 0);
    }
}
