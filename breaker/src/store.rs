//! C2: Shared Window Store — time-bucketed per-second success/failure
//! counters held in an external key-value store with TTL (§4.2, §6).
//!
//! The interface is abstract (`WindowStore`); any store offering atomic
//! increment-with-delta and absolute-time expiry satisfies it. Writing our
//! own Redis wire protocol is explicitly out of scope (§1) — we depend on
//! the `redis` crate, the same way `storage::redis::RedisStorage` does
//! elsewhere in this workspace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::BTreeMap;
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Success/failure counts for a single one-second bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BucketCounts {
    pub success: u64,
    pub failure: u64,
}

/// An ordered mapping of unix-second → bucket, as returned by a range read.
pub type WindowBuckets = BTreeMap<i64, BucketCounts>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store unreachable: {0}")]
    Unreachable(String),
}

/// External collaborator (§4.2): a time-bucketed counter store with TTL.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Flushes `(success, failed)` deltas for `breaker_name` into the bucket
    /// for `at`. A zero delta is not written. Each key's TTL is set to
    /// `at + 2 * window_seconds`.
    async fn write(
        &self,
        breaker_name: &str,
        at: DateTime<Utc>,
        success: u64,
        failed: u64,
        window_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Fetches every bucket in `[start, end]` for `breaker_name` in a single
    /// round trip. Missing keys count as zero.
    async fn read_range(
        &self,
        breaker_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowBuckets, StoreError>;
}

fn success_key(breaker_name: &str, second: i64) -> String {
    let ts = DateTime::from_timestamp(second, 0)
        .expect("valid unix second")
        .format(TIMESTAMP_FORMAT);
    format!("breaker:{breaker_name}:success:-{ts}")
}

fn failure_key(breaker_name: &str, second: i64) -> String {
    let ts = DateTime::from_timestamp(second, 0)
        .expect("valid unix second")
        .format(TIMESTAMP_FORMAT);
    format!("breaker:{breaker_name}:failure:-{ts}")
}

/// Redis-backed [`WindowStore`]. Uses a `ConnectionManager`, which
/// transparently reconnects, so callers don't need their own retry loop for
/// dropped connections.
pub struct RedisWindowStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisWindowStore {
    pub async fn connect(connection_string: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(Self { connection_manager })
    }

    pub fn from_connection_manager(connection_manager: redis::aio::ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn write(
        &self,
        breaker_name: &str,
        at: DateTime<Utc>,
        success: u64,
        failed: u64,
        window_seconds: u64,
    ) -> Result<(), StoreError> {
        if success == 0 && failed == 0 {
            return Ok(());
        }

        let expire_at = at.timestamp() + 2 * window_seconds as i64;
        let mut conn = self.connection_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        if success > 0 {
            let key = success_key(breaker_name, at.timestamp());
            pipe.cmd("INCRBY").arg(&key).arg(success).ignore();
            pipe.cmd("EXPIREAT").arg(&key).arg(expire_at).ignore();
        }
        if failed > 0 {
            let key = failure_key(breaker_name, at.timestamp());
            pipe.cmd("INCRBY").arg(&key).arg(failed).ignore();
            pipe.cmd("EXPIREAT").arg(&key).arg(expire_at).ignore();
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        Ok(())
    }

    async fn read_range(
        &self,
        breaker_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowBuckets, StoreError> {
        let mut buckets = WindowBuckets::new();
        let start_secs = start.timestamp();
        let end_secs = end.timestamp();
        if start_secs > end_secs {
            return Ok(buckets);
        }

        let seconds: Vec<i64> = (start_secs..=end_secs).collect();
        let success_keys: Vec<String> = seconds.iter().map(|s| success_key(breaker_name, *s)).collect();
        let failure_keys: Vec<String> = seconds.iter().map(|s| failure_key(breaker_name, *s)).collect();

        let mut conn = self.connection_manager.clone();
        let success_values: Vec<Option<i64>> = conn
            .mget(&success_keys)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let failure_values: Vec<Option<i64>> = conn
            .mget(&failure_keys)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        for (i, second) in seconds.iter().enumerate() {
            let success = success_values.get(i).copied().flatten().unwrap_or(0).max(0) as u64;
            let failure = failure_values.get(i).copied().flatten().unwrap_or(0).max(0) as u64;
            buckets.insert(*second, BucketCounts { success, failure });
        }

        Ok(buckets)
    }
}

/// An in-memory [`WindowStore`] used by unit tests and as a local-only
/// fallback when no real shared store is available.
#[derive(Default)]
pub struct InMemoryWindowStore {
    buckets: tokio::sync::Mutex<std::collections::HashMap<String, WindowBuckets>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn write(
        &self,
        breaker_name: &str,
        at: DateTime<Utc>,
        success: u64,
        failed: u64,
        _window_seconds: u64,
    ) -> Result<(), StoreError> {
        if success == 0 && failed == 0 {
            return Ok(());
        }
        let mut guard = self.buckets.lock().await;
        let entry = guard
            .entry(breaker_name.to_string())
            .or_default()
            .entry(at.timestamp())
            .or_default();
        entry.success += success;
        entry.failure += failed;
        Ok(())
    }

    async fn read_range(
        &self,
        breaker_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowBuckets, StoreError> {
        let guard = self.buckets.lock().await;
        let mut result = WindowBuckets::new();
        if let Some(existing) = guard.get(breaker_name) {
            for second in start.timestamp()..=end.timestamp() {
                result.insert(second, existing.get(&second).copied().unwrap_or_default());
            }
        } else {
            for second in start.timestamp()..=end.timestamp() {
                result.insert(second, BucketCounts::default());
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_writes() {
        let store = InMemoryWindowStore::new();
        store.write("svc", at(100), 3, 1, 60).await.unwrap();
        store.write("svc", at(101), 0, 2, 60).await.unwrap();

        let buckets = store.read_range("svc", at(99), at(102)).await.unwrap();
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[&99], BucketCounts::default());
        assert_eq!(buckets[&100], BucketCounts { success: 3, failure: 1 });
        assert_eq!(buckets[&101], BucketCounts { success: 0, failure: 2 });
        assert_eq!(buckets[&102], BucketCounts::default());
    }

    #[tokio::test]
    async fn zero_delta_is_not_written() {
        let store = InMemoryWindowStore::new();
        store.write("svc", at(100), 0, 0, 60).await.unwrap();
        let buckets = store.read_range("svc", at(100), at(100)).await.unwrap();
        assert_eq!(buckets[&100], BucketCounts::default());
    }

    #[test]
    fn key_format_matches_the_wire_protocol() {
        assert_eq!(
            success_key("svc", 0),
            "breaker:svc:success:-1970-01-01T00:00:00"
        );
        assert_eq!(
            failure_key("svc", 0),
            "breaker:svc:failure:-1970-01-01T00:00:00"
        );
    }
}
