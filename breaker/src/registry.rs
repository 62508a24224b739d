//! C6: Registry — process-wide `name -> strategy` mapping (§4.6), reframed
//! per the design notes (§9) as an explicit `BreakerRuntime` value rather
//! than a hidden singleton, so tests can construct an isolated runtime per
//! case instead of sharing global state.

use crate::clock::{MonotonicClock, SystemMonotonicClock, SystemWallClock, WallClock};
use crate::config::{
    BreakerConfigBuilder, ConfigError, FeatureFlagSource, NoopFeatureFlagSource, NoopRemoteConfigSource,
    RemoteConfigSource,
};
use crate::store::WindowStore;
use crate::strategy::Strategy;
use dashmap::DashMap;
use std::sync::Arc;

/// Owns every shared collaborator a breaker needs and the registry mapping
/// breaker name to its strategy instance. One runtime per process (§9).
pub struct BreakerRuntime {
    store: Arc<dyn WindowStore>,
    wall_clock: Arc<dyn WallClock>,
    monotonic_clock: Arc<dyn MonotonicClock>,
    feature_flags: Arc<dyn FeatureFlagSource>,
    remote_config: Arc<dyn RemoteConfigSource>,
    strategies: DashMap<String, Arc<Strategy>>,
}

impl BreakerRuntime {
    pub fn new(
        store: Arc<dyn WindowStore>,
        wall_clock: Arc<dyn WallClock>,
        monotonic_clock: Arc<dyn MonotonicClock>,
        feature_flags: Arc<dyn FeatureFlagSource>,
        remote_config: Arc<dyn RemoteConfigSource>,
    ) -> Self {
        Self {
            store,
            wall_clock,
            monotonic_clock,
            feature_flags,
            remote_config,
            strategies: DashMap::new(),
        }
    }

    /// A runtime backed by a real store with no feature-flag gating and no
    /// remote config source, wired to the system clocks.
    pub fn with_store(store: Arc<dyn WindowStore>) -> Self {
        Self::new(
            store,
            Arc::new(SystemWallClock),
            Arc::new(SystemMonotonicClock::default()),
            Arc::new(NoopFeatureFlagSource),
            Arc::new(NoopRemoteConfigSource),
        )
    }

    /// Idempotent, thread-safe lookup-or-create (§4.6, I5, P6). `configure`
    /// is applied only if no strategy named `name` exists yet; the remote
    /// config source is consulted once, at creation, per §6. If two callers
    /// race past the fast-path check, both build a candidate strategy but
    /// [`DashMap::entry`] guarantees only the first to reach it is kept —
    /// the later caller's config is silently discarded, matching the
    /// documented "first caller wins" semantics (§9 open questions).
    pub async fn get_or_create(
        &self,
        name: &str,
        configure: impl FnOnce(BreakerConfigBuilder) -> BreakerConfigBuilder,
    ) -> Result<Arc<Strategy>, ConfigError> {
        if let Some(existing) = self.strategies.get(name) {
            return Ok(existing.clone());
        }

        let overrides = self.remote_config.config_for(name).await;
        let config = configure(BreakerConfigBuilder::new(name))
            .apply_remote_overrides(overrides)
            .build()?;

        let candidate = Arc::new(Strategy::new(
            config,
            self.store.clone(),
            self.wall_clock.clone(),
            self.monotonic_clock.clone(),
            self.feature_flags.clone(),
        ));

        let entry = self
            .strategies
            .entry(name.to_string())
            .or_insert_with(|| candidate);
        Ok(entry.clone())
    }

    /// Returns an already-created strategy without installing one.
    pub fn get(&self, name: &str) -> Option<Arc<Strategy>> {
        self.strategies.get(name).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWindowStore;

    fn runtime() -> BreakerRuntime {
        BreakerRuntime::with_store(Arc::new(InMemoryWindowStore::new()))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_by_name() {
        let runtime = runtime();
        let a = runtime.get_or_create("svc", |b| b.min_requests(5)).await.unwrap();
        let b = runtime.get_or_create("svc", |b| b.min_requests(999)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().min_requests(), 5);
        assert_eq!(runtime.len(), 1);
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_strategies() {
        let runtime = runtime();
        let a = runtime.get_or_create("svc-a", |b| b).await.unwrap();
        let b = runtime.get_or_create("svc-b", |b| b).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(runtime.len(), 2);
    }

    #[tokio::test]
    async fn propagates_fatal_configuration_errors() {
        let runtime = runtime();
        let err = runtime
            .get_or_create("svc", |b| b.open_threshold(0.3).close_threshold(0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHysteresis { .. }));
        assert!(runtime.is_empty());
    }

    #[tokio::test]
    async fn concurrent_creation_converges_on_one_instance() {
        let runtime = Arc::new(runtime());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let runtime = runtime.clone();
            handles.push(tokio::spawn(async move {
                runtime.get_or_create("svc", |b| b).await.unwrap()
            }));
        }
        let mut strategies = Vec::new();
        for h in handles {
            strategies.push(h.await.unwrap());
        }
        let first = &strategies[0];
        assert!(strategies.iter().all(|s| Arc::ptr_eq(s, first)));
    }
}
