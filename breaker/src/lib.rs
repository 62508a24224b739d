//! Distributed circuit breaker for service clients in a replicated fleet.
//!
//! Trips a per-replica fast-fail gate once the *fleet-wide* recent failure
//! ratio for a named downstream crosses a threshold, blending an in-process
//! counter buffer ([`buffer::LocalBuffer`]) with a Redis-backed shared
//! window ([`store::RedisWindowStore`]) through a rate-limited aggregator
//! ([`aggregator::WindowAggregator`]). Two states only, CLOSED and OPEN — no
//! half-open probing — with hysteresis between the trip and recovery
//! thresholds and a timer-based unconditional recovery path.
//!
//! Typical use: build a [`BreakerRuntime`] once per process, hand it a
//! [`store::WindowStore`], then call [`BreakerRuntime::get_or_create`] per
//! downstream name and drive calls through [`wrap`] or [`use_scope`].

pub mod aggregator;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod store;
pub mod strategy;
pub mod wrapper;

pub use aggregator::{AggregateView, WindowAggregator};
pub use buffer::LocalBuffer;
pub use clock::{ManualClock, MonotonicClock, SystemMonotonicClock, SystemWallClock, WallClock};
pub use config::{
    BreakerConfig, BreakerConfigBuilder, FeatureFlagSource, NoopFeatureFlagSource, NoopRemoteConfigSource,
    RemoteConfigOverrides, RemoteConfigSource, StaticConfigSource,
};
pub use error::{BreakerError, ConfigError};
pub use registry::BreakerRuntime;
pub use state::{State, StateSnapshot};
pub use store::{BucketCounts, InMemoryWindowStore, RedisWindowStore, StoreError, WindowBuckets, WindowStore};
pub use strategy::{Strategy, StrategySnapshot};
pub use wrapper::{use_scope, wrap, GatedStream, UseGuard, WrapOptions, Wrapped};
