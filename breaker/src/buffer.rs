//! C1: Local Counter Buffer — per-breaker in-memory success/failure counters
//! since the last flush (§4.1). All operations are lock-free and O(1).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// In-process, unsynced success/failure counters for one breaker.
///
/// `reset` followed by further increments never loses an increment issued
/// after `reset` returns: the counters are reset before `buffer_start` is
/// updated, and increments only ever add to whatever the counters currently
/// hold, so a racing increment either lands before or after the reset and is
/// counted exactly once either way.
#[derive(Debug, Default)]
pub struct LocalBuffer {
    success: AtomicU64,
    failed: AtomicU64,
    buffer_start: AtomicI64,
}

impl LocalBuffer {
    pub fn new(now_unix: i64) -> Self {
        Self {
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            buffer_start: AtomicI64::new(now_unix),
        }
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads `(success, failed)`. May be stale by at most one concurrent
    /// increment — this buffer trades exactness for never blocking.
    pub fn read(&self) -> (u64, u64) {
        (
            self.success.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }

    pub fn buffer_start(&self) -> i64 {
        self.buffer_start.load(Ordering::Relaxed)
    }

    /// Atomically zeroes both counters and stamps a new `buffer_start`.
    pub fn reset(&self, now_unix: i64) {
        self.success.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.buffer_start.store(now_unix, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_are_additive() {
        let buf = LocalBuffer::new(0);
        buf.record_success();
        buf.record_success();
        buf.record_failure();
        assert_eq!(buf.read(), (2, 1));
    }

    #[test]
    fn reset_zeroes_counters_and_restamps_start() {
        let buf = LocalBuffer::new(0);
        buf.record_success();
        buf.reset(42);
        assert_eq!(buf.read(), (0, 0));
        assert_eq!(buf.buffer_start(), 42);
    }

    #[test]
    fn concurrent_increments_are_never_lost() {
        let buf = Arc::new(LocalBuffer::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let buf = buf.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    buf.record_success();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.read(), (8000, 0));
    }

    #[test]
    fn increment_after_reset_is_never_lost() {
        let buf = LocalBuffer::new(0);
        buf.record_success();
        buf.reset(1);
        buf.record_success();
        assert_eq!(buf.read(), (1, 0));
    }
}
