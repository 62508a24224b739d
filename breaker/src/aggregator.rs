//! C3: Window Aggregator — combines recent shared-store buckets with the
//! local buffer into a single `(events, failures)` tuple, refreshing a
//! locally cached snapshot no more than once per `readDelaySeconds` (§4.3).

use crate::buffer::LocalBuffer;
use crate::clock::WallClock;
use crate::store::{WindowBuckets, WindowStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The cached shared-store view held per breaker (§3).
#[derive(Debug, Clone)]
struct Snapshot {
    end_timestamp: i64,
    buckets: WindowBuckets,
}

/// The result of asking the aggregator for the current fleet-wide view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateView {
    pub total_events: u64,
    pub total_failures: u64,
    pub refreshed: bool,
}

impl AggregateView {
    pub fn failure_ratio(&self) -> f64 {
        if self.total_events == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_events as f64
        }
    }
}

/// Serializes refreshes per breaker (§4.3, §5) and holds the cached
/// snapshot. One `WindowAggregator` belongs to exactly one breaker.
pub struct WindowAggregator {
    breaker_name: String,
    window_seconds: u64,
    read_delay_seconds: u64,
    store: Arc<dyn WindowStore>,
    buffer: Arc<LocalBuffer>,
    wall_clock: Arc<dyn WallClock>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl WindowAggregator {
    pub fn new(
        breaker_name: String,
        window_seconds: u64,
        read_delay_seconds: u64,
        store: Arc<dyn WindowStore>,
        buffer: Arc<LocalBuffer>,
        wall_clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            breaker_name,
            window_seconds,
            read_delay_seconds,
            store,
            buffer,
            wall_clock,
            snapshot: Mutex::new(None),
        }
    }

    /// Implements the refresh protocol and aggregation from §4.3. A single
    /// `tokio::sync::Mutex` per breaker means a concurrent caller either
    /// waits for an in-flight refresh or observes its result — never a
    /// double flush.
    pub async fn view(&self) -> AggregateView {
        let now = self.wall_clock.now();
        let now_secs = now.timestamp();

        let mut guard = self.snapshot.lock().await;

        let needs_refresh = match guard.as_ref() {
            None => true,
            Some(snap) => now_secs - snap.end_timestamp > self.read_delay_seconds as i64,
        };

        if !needs_refresh {
            let snap = guard.as_ref().expect("checked above");
            let (sum_success, sum_failure) = sum_buckets(&snap.buckets);
            let (buffered_success, buffered_failure) = self.buffer.read();
            return AggregateView {
                total_events: sum_success + sum_failure + buffered_success + buffered_failure,
                total_failures: sum_failure + buffered_failure,
                refreshed: false,
            };
        }

        let (start, fresh_snapshot) = match guard.as_ref() {
            None => (now_secs - (self.window_seconds as i64 + self.read_delay_seconds as i64), None),
            Some(snap) => (snap.end_timestamp - self.read_delay_seconds as i64, Some(snap.clone())),
        };

        let read_from = DateTime::from_timestamp(start, 0).unwrap_or(now);
        let read_result = self.store.read_range(&self.breaker_name, read_from, now).await;

        let mut buckets = match &fresh_snapshot {
            Some(snap) => snap.buckets.clone(),
            None => WindowBuckets::new(),
        };

        match read_result {
            Ok(new_buckets) => {
                for (second, counts) in new_buckets {
                    buckets.insert(second, counts);
                }
            }
            Err(e) => {
                tracing::warn!(
                    breaker = %self.breaker_name,
                    error = %e,
                    "shared window store unreachable; refreshing from local buffer only"
                );
            }
        }

        // Inject the local buffer as a synthetic bucket keyed at `now`,
        // flush it to the shared store, then reset it — a single logical
        // transition (§4.3 steps b-d).
        let (buffered_success, buffered_failure) = self.buffer.read();
        let synthetic = buckets.entry(now_secs).or_default();
        synthetic.success += buffered_success;
        synthetic.failure += buffered_failure;

        if let Err(e) = self
            .store
            .write(&self.breaker_name, now, buffered_success, buffered_failure, self.window_seconds)
            .await
        {
            tracing::warn!(
                breaker = %self.breaker_name,
                error = %e,
                "failed to flush local buffer to shared window store"
            );
        }
        self.buffer.reset(now_secs);

        let cutoff = now_secs - self.window_seconds as i64;
        buckets.retain(|second, _| *second >= cutoff);

        let (sum_success, sum_failure) = sum_buckets(&buckets);
        let (post_reset_success, post_reset_failure) = self.buffer.read();

        *guard = Some(Snapshot {
            end_timestamp: now_secs,
            buckets,
        });

        AggregateView {
            total_events: sum_success + sum_failure + post_reset_success + post_reset_failure,
            total_failures: sum_failure + post_reset_failure,
            refreshed: true,
        }
    }
}

fn sum_buckets(buckets: &WindowBuckets) -> (u64, u64) {
    buckets.values().fold((0, 0), |(s, f), b| (s + b.success, f + b.failure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryWindowStore;

    fn aggregator(clock: ManualClock, read_delay: u64) -> WindowAggregator {
        WindowAggregator::new(
            "svc".to_string(),
            60,
            read_delay,
            Arc::new(InMemoryWindowStore::new()),
            Arc::new(LocalBuffer::new(0)),
            Arc::new(clock),
        )
    }

    #[tokio::test]
    async fn first_view_always_refreshes() {
        let clock = ManualClock::new(Utc::now());
        let agg = aggregator(clock, 1);
        let view = agg.view().await;
        assert!(view.refreshed);
        assert_eq!(view.total_events, 0);
    }

    #[tokio::test]
    async fn buffered_outcomes_are_counted_before_any_refresh() {
        let clock = ManualClock::new(Utc::now());
        let buffer = Arc::new(LocalBuffer::new(0));
        buffer.record_failure();
        buffer.record_failure();
        buffer.record_success();

        let agg = WindowAggregator::new(
            "svc".to_string(),
            60,
            1,
            Arc::new(InMemoryWindowStore::new()),
            buffer,
            Arc::new(clock),
        );

        let view = agg.view().await;
        assert_eq!(view.total_events, 3);
        assert_eq!(view.total_failures, 2);
    }

    #[tokio::test]
    async fn refresh_is_rate_limited_by_read_delay() {
        let clock = ManualClock::new(Utc::now());
        let buffer = Arc::new(LocalBuffer::new(0));
        let store = Arc::new(InMemoryWindowStore::new());
        let agg = WindowAggregator::new(
            "svc".to_string(),
            60,
            5,
            store,
            buffer.clone(),
            Arc::new(clock.clone()),
        );

        let first = agg.view().await;
        assert!(first.refreshed);

        buffer.record_failure();
        let second = agg.view().await;
        assert!(!second.refreshed);
        // buffer is read fresh even without a refresh
        assert_eq!(second.total_failures, 1);

        clock.advance(6);
        let third = agg.view().await;
        assert!(third.refreshed);
    }

    #[tokio::test]
    async fn flush_resets_the_local_buffer() {
        let clock = ManualClock::new(Utc::now());
        let buffer = Arc::new(LocalBuffer::new(0));
        buffer.record_failure();
        let store = Arc::new(InMemoryWindowStore::new());
        let agg = WindowAggregator::new(
            "svc".to_string(),
            60,
            1,
            store,
            buffer.clone(),
            Arc::new(clock),
        );

        agg.view().await;
        assert_eq!(buffer.read(), (0, 0));
    }

    #[tokio::test]
    async fn cross_replica_failures_converge_through_the_shared_store() {
        let store: Arc<dyn WindowStore> = Arc::new(InMemoryWindowStore::new());
        let clock_a = ManualClock::new(Utc::now());
        let buffer_a = Arc::new(LocalBuffer::new(0));
        for _ in 0..5 {
            buffer_a.record_failure();
        }
        let agg_a = WindowAggregator::new(
            "svc".to_string(),
            60,
            1,
            store.clone(),
            buffer_a,
            Arc::new(clock_a.clone()),
        );
        agg_a.view().await;

        // Replica B shares only the store, not the buffer or clock start.
        let clock_b = ManualClock::new(clock_a.now());
        let buffer_b = Arc::new(LocalBuffer::new(0));
        for _ in 0..5 {
            buffer_b.record_failure();
        }
        let agg_b = WindowAggregator::new("svc".to_string(), 60, 1, store, buffer_b, Arc::new(clock_b));
        let view_b = agg_b.view().await;

        assert_eq!(view_b.total_events, 10);
        assert_eq!(view_b.total_failures, 10);
    }
}
