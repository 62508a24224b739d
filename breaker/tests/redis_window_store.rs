//! Integration tests for [`RedisWindowStore`] and the cross-replica
//! convergence scenario (P7, spec §8 scenario 6) against a disposable Redis
//! instance. Skipped when Docker is unavailable, same as the rest of this
//! workspace's testcontainers-backed suites.

use breaker::{BreakerConfigBuilder, ManualClock, RedisWindowStore, Strategy, WindowStore};
use breaker_testing::{redis, unique_breaker_name};
use std::sync::Arc;

#[tokio::test]
async fn write_then_read_range_round_trips_through_real_redis() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis integration test: Docker not available");
        return;
    };

    let store = RedisWindowStore::connect(fixture.url()).await.expect("connect to redis");
    let name = unique_breaker_name("round-trip");
    let now = chrono::Utc::now();

    store.write(&name, now, 3, 1, 60).await.expect("write succeeds");

    let buckets = store
        .read_range(&name, now, now)
        .await
        .expect("read_range succeeds");

    let counts = buckets.get(&now.timestamp()).expect("bucket present");
    assert_eq!(counts.success, 3);
    assert_eq!(counts.failure, 1);
}

#[tokio::test]
async fn missing_buckets_read_as_zero() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis integration test: Docker not available");
        return;
    };

    let store = RedisWindowStore::connect(fixture.url()).await.expect("connect to redis");
    let name = unique_breaker_name("missing-buckets");
    let now = chrono::Utc::now();

    let buckets = store
        .read_range(&name, now - chrono::Duration::seconds(2), now)
        .await
        .expect("read_range succeeds");

    assert_eq!(buckets.len(), 3);
    assert!(buckets.values().all(|b| b.success == 0 && b.failure == 0));
}

#[tokio::test]
async fn zero_delta_writes_nothing() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis integration test: Docker not available");
        return;
    };

    let store = RedisWindowStore::connect(fixture.url()).await.expect("connect to redis");
    let name = unique_breaker_name("zero-delta");
    let now = chrono::Utc::now();

    store.write(&name, now, 0, 0, 60).await.expect("write succeeds");

    let buckets = store.read_range(&name, now, now).await.expect("read_range succeeds");
    let counts = buckets.get(&now.timestamp()).expect("bucket present");
    assert_eq!(counts.success, 0);
    assert_eq!(counts.failure, 0);
}

/// Scenario 6 / property P7: two independent replicas, sharing only the
/// Redis store, each contribute failures below `minRequests`; the second
/// replica's aggregate view trips open purely from the convergence through
/// C2, without either replica issuing `minRequests` failures on its own.
///
/// With `readDelaySeconds = 0`, a refresh (and therefore a flush of C1 into
/// C2) only happens when the wall clock has advanced since the last refresh
/// (aggregator.rs's `needs_refresh` check is `now - end_timestamp > 0`). A
/// tight loop of `on_failure` calls made within the same wall-clock second
/// would flush only the first of them and leave the rest stuck in the local
/// buffer, so each replica's clock is advanced by a second between calls to
/// force one flush per failure.
#[tokio::test]
async fn cross_replica_failures_converge_and_trip_through_redis() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis integration test: Docker not available");
        return;
    };

    let store: Arc<dyn WindowStore> = Arc::new(RedisWindowStore::connect(fixture.url()).await.expect("connect"));
    let name = unique_breaker_name("cross-replica");

    let config_a = BreakerConfigBuilder::new(&name)
        .min_requests(10)
        .open_threshold(0.5)
        .close_threshold(0.5)
        .read_delay_seconds(0)
        .build()
        .unwrap();
    let clock_a = ManualClock::new(chrono::Utc::now());
    let replica_a = Strategy::always_enabled(config_a, store.clone(), Arc::new(clock_a.clone()), Arc::new(clock_a.clone()));
    for i in 0..5 {
        replica_a.on_failure("boom".to_string()).await;
        if i < 4 {
            clock_a.advance(1);
        }
    }
    assert!(replica_a.should_admit(), "replica A alone has only 5 events, below minRequests");

    let config_b = BreakerConfigBuilder::new(&name)
        .min_requests(10)
        .open_threshold(0.5)
        .close_threshold(0.5)
        .read_delay_seconds(0)
        .build()
        .unwrap();
    // Replica B shares only the store, not the buffer or clock instance --
    // it picks up where A's clock left off so both replicas' buckets fall
    // inside the same 60-second window.
    let clock_b = ManualClock::new(clock_a.now());
    let replica_b = Strategy::always_enabled(config_b, store, Arc::new(clock_b.clone()), Arc::new(clock_b.clone()));
    for i in 0..5 {
        replica_b.on_failure("boom".to_string()).await;
        if i < 4 {
            clock_b.advance(1);
        }
    }

    assert!(
        !replica_b.should_admit(),
        "replica B should observe the fleet-wide aggregate and trip open"
    );
}
