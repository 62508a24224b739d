//! C4: Breaker State Machine — two states, no half-open, hysteresis between
//! trip and recovery thresholds, and a lazily-evaluated recovery timer
//! (§4.4).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
}

/// A point-in-time read of the machine, used both for admission decisions
/// and for [`crate::strategy::Strategy::state_snapshot`] (§4.5).
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub state: State,
    pub failure_count: u64,
    pub seconds_until_recovery: i64,
    pub last_failure: Option<String>,
}

/// The mutable state owned by one breaker. `openedAtMonotonic` and
/// `failureCount` are atomics so admission checks never block; `lastFailure`
/// sits behind a plain `RwLock` since its critical section never awaits.
pub struct BreakerStateMachine {
    open: AtomicBool,
    opened_at_monotonic: AtomicI64,
    failure_count: AtomicU64,
    last_failure: RwLock<Option<String>>,
}

impl std::fmt::Debug for BreakerStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerStateMachine")
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for BreakerStateMachine {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(false),
            opened_at_monotonic: AtomicI64::new(0),
            failure_count: AtomicU64::new(0),
            last_failure: RwLock::new(None),
        }
    }
}

impl BreakerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazy OPEN -> CLOSED recovery check (§4.4). Called on every state
    /// read, including pre-admission reads. Mutates and returns the
    /// up-to-date state; never blocks on I/O.
    fn maybe_recover(&self, now_monotonic: u64, recovery_timeout_secs: u64) -> State {
        if !self.open.load(Ordering::Acquire) {
            return State::Closed;
        }
        let opened_at = self.opened_at_monotonic.load(Ordering::Acquire);
        if now_monotonic as i64 - opened_at >= recovery_timeout_secs as i64 {
            // Compare-and-swap so concurrent admission paths agree on a
            // single winner; losers just observe the already-flipped state.
            if self
                .open
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            State::Closed
        } else {
            State::Open
        }
    }

    /// Current state after applying the lazy recovery check (§4.4, §5).
    pub fn current_state(&self, now_monotonic: u64, recovery_timeout_secs: u64) -> State {
        self.maybe_recover(now_monotonic, recovery_timeout_secs)
    }

    pub fn snapshot(&self, now_monotonic: u64, recovery_timeout_secs: u64) -> StateSnapshot {
        let state = self.maybe_recover(now_monotonic, recovery_timeout_secs);
        let seconds_until_recovery = match state {
            State::Closed => 0,
            State::Open => {
                let opened_at = self.opened_at_monotonic.load(Ordering::Acquire);
                (opened_at + recovery_timeout_secs as i64 - now_monotonic as i64).max(0)
            }
        };
        StateSnapshot {
            state,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            seconds_until_recovery,
            last_failure: self.last_failure.read().expect("lock not poisoned").clone(),
        }
    }

    pub fn record_last_failure(&self, description: String) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.write().expect("lock not poisoned") = Some(description);
    }

    /// Applies the CLOSED -> OPEN trip rule (§4.4). No-op if already open.
    pub fn trip(&self, now_monotonic: u64) -> bool {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.opened_at_monotonic.store(now_monotonic as i64, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Applies the opportunistic OPEN -> CLOSED rule driven by a fresh
    /// aggregate view falling at or below `closeThreshold` (§4.4).
    pub fn close(&self) -> bool {
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.failure_count.store(0, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_open(&self, now_monotonic: u64, recovery_timeout_secs: u64) -> bool {
        matches!(self.current_state(now_monotonic, recovery_timeout_secs), State::Open)
    }
}

/// Evaluates the trip/untrip decision for a given aggregate view (§4.4),
/// pure and independent of any particular state machine instance so it can
/// be unit tested without constructing one.
pub fn should_trip(
    total_events: u64,
    total_failures: u64,
    min_requests: u64,
    open_threshold: f64,
) -> bool {
    if total_events < min_requests {
        return false;
    }
    (total_failures as f64 / total_events as f64) >= open_threshold
}

pub fn should_close(total_events: u64, total_failures: u64, close_threshold: f64) -> bool {
    if total_events == 0 {
        return false;
    }
    (total_failures as f64 / total_events as f64) <= close_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let sm = BreakerStateMachine::new();
        assert_eq!(sm.current_state(0, 30), State::Closed);
    }

    #[test]
    fn trip_moves_to_open_and_is_idempotent() {
        let sm = BreakerStateMachine::new();
        assert!(sm.trip(100));
        assert_eq!(sm.current_state(100, 30), State::Open);
        assert!(!sm.trip(105), "second trip while already open is a no-op");
    }

    #[test]
    fn recovery_timer_flips_to_closed_on_read() {
        let sm = BreakerStateMachine::new();
        sm.trip(0);
        assert_eq!(sm.current_state(29, 30), State::Open);
        assert_eq!(sm.current_state(30, 30), State::Closed);
    }

    #[test]
    fn close_is_a_noop_when_already_closed() {
        let sm = BreakerStateMachine::new();
        assert!(!sm.close());
    }

    #[test]
    fn snapshot_reports_seconds_until_recovery() {
        let sm = BreakerStateMachine::new();
        sm.trip(10);
        sm.record_last_failure("timeout".to_string());
        let snap = sm.snapshot(15, 30);
        assert_eq!(snap.state, State::Open);
        assert_eq!(snap.seconds_until_recovery, 25);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.last_failure.as_deref(), Some("timeout"));
    }

    #[test]
    fn should_trip_requires_min_requests_and_threshold() {
        assert!(!should_trip(9, 9, 10, 0.5));
        assert!(should_trip(10, 5, 10, 0.5));
        assert!(!should_trip(10, 4, 10, 0.5));
    }

    #[test]
    fn should_close_at_or_below_threshold() {
        assert!(should_close(10, 5, 0.5));
        assert!(!should_close(10, 6, 0.5));
        assert!(!should_close(0, 0, 0.5));
    }
}
