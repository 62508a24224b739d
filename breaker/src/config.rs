//! Per-breaker configuration (§3) and the two external delivery interfaces
//! from §6: remote config and feature flags. Both interfaces are specified
//! here only at their trait boundary — wiring them to an actual delivery
//! system (etcd, a flag SaaS, ...) is left to the embedding application.

use crate::error::ConfigError;
use async_trait::async_trait;

/// Immutable configuration for a single breaker instance (§3).
///
/// `fallback` and `failureClassifier` from the spec's data model are
/// intentionally not fields here: both are typed in terms of the wrapped
/// call's value and error types, which this shared, registry-resident
/// config is not generic over. They are supplied per call site as
/// [`crate::wrapper::WrapOptions`] instead — see `DESIGN.md` for the
/// rationale. Everything that is a plain number or string lives here and is
/// read once at registry creation, per §4.6.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub(crate) name: String,
    pub(crate) window_seconds: u64,
    pub(crate) min_requests: u64,
    pub(crate) open_threshold: f64,
    pub(crate) close_threshold: f64,
    pub(crate) recovery_timeout_seconds: u64,
    pub(crate) read_delay_seconds: u64,
}

pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_MIN_REQUESTS: u64 = 30;
pub const DEFAULT_OPEN_THRESHOLD: f64 = 0.5;
pub const DEFAULT_CLOSE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_RECOVERY_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_READ_DELAY_SECONDS: u64 = 1;

/// Builds a [`BreakerConfig`], validating hysteresis and range constraints
/// at build time rather than letting a malformed config reach the registry
/// (§7 fatal errors f/g).
pub struct BreakerConfigBuilder {
    name: String,
    window_seconds: u64,
    min_requests: u64,
    open_threshold: f64,
    close_threshold: f64,
    recovery_timeout_seconds: u64,
    read_delay_seconds: u64,
}

impl BreakerConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window_seconds: DEFAULT_WINDOW_SECONDS,
            min_requests: DEFAULT_MIN_REQUESTS,
            open_threshold: DEFAULT_OPEN_THRESHOLD,
            close_threshold: DEFAULT_CLOSE_THRESHOLD,
            recovery_timeout_seconds: DEFAULT_RECOVERY_TIMEOUT_SECONDS,
            read_delay_seconds: DEFAULT_READ_DELAY_SECONDS,
        }
    }

    pub fn window_seconds(mut self, value: u64) -> Self {
        self.window_seconds = value;
        self
    }

    pub fn min_requests(mut self, value: u64) -> Self {
        self.min_requests = value;
        self
    }

    pub fn open_threshold(mut self, value: f64) -> Self {
        self.open_threshold = value;
        self
    }

    pub fn close_threshold(mut self, value: f64) -> Self {
        self.close_threshold = value;
        self
    }

    pub fn recovery_timeout_seconds(mut self, value: u64) -> Self {
        self.recovery_timeout_seconds = value;
        self
    }

    pub fn read_delay_seconds(mut self, value: u64) -> Self {
        self.read_delay_seconds = value;
        self
    }

    /// Applies overrides from a [`RemoteConfigSource`] read once at breaker
    /// creation time; absent keys keep whatever was set on the builder.
    pub fn apply_remote_overrides(mut self, overrides: RemoteConfigOverrides) -> Self {
        if let Some(v) = overrides.window_seconds {
            self.window_seconds = v;
        }
        if let Some(v) = overrides.min_requests {
            self.min_requests = v;
        }
        if let Some(v) = overrides.read_delay_seconds {
            self.read_delay_seconds = v;
        }
        self
    }

    pub fn build(self) -> Result<BreakerConfig, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.window_seconds == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if self.min_requests == 0 {
            return Err(ConfigError::InvalidMinRequests);
        }
        if self.recovery_timeout_seconds == 0 {
            return Err(ConfigError::InvalidRecoveryTimeout);
        }
        if !(self.open_threshold > 0.0 && self.open_threshold <= 1.0) {
            return Err(ConfigError::InvalidOpenThreshold);
        }
        if !(self.close_threshold > 0.0 && self.close_threshold <= 1.0) {
            return Err(ConfigError::InvalidCloseThreshold);
        }
        if self.close_threshold > self.open_threshold {
            return Err(ConfigError::InvalidHysteresis {
                close: self.close_threshold.to_string(),
                open: self.open_threshold.to_string(),
            });
        }

        Ok(BreakerConfig {
            name: self.name,
            window_seconds: self.window_seconds,
            min_requests: self.min_requests,
            open_threshold: self.open_threshold,
            close_threshold: self.close_threshold,
            recovery_timeout_seconds: self.recovery_timeout_seconds,
            read_delay_seconds: self.read_delay_seconds,
        })
    }
}

impl BreakerConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn min_requests(&self) -> u64 {
        self.min_requests
    }

    pub fn open_threshold(&self) -> f64 {
        self.open_threshold
    }

    pub fn close_threshold(&self) -> f64 {
        self.close_threshold
    }

    pub fn recovery_timeout_seconds(&self) -> u64 {
        self.recovery_timeout_seconds
    }

    pub fn read_delay_seconds(&self) -> u64 {
        self.read_delay_seconds
    }
}

/// Optional per-breaker overrides delivered by a [`RemoteConfigSource`].
/// Absent fields fall back to whatever the builder or crate defaults say.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteConfigOverrides {
    pub window_seconds: Option<u64>,
    pub min_requests: Option<u64>,
    pub read_delay_seconds: Option<u64>,
}

/// External collaborator (§6): per-breaker remote configuration, read once
/// at breaker creation. Must never raise — a failing lookup is treated as
/// "no overrides" (§7 internal-recovered e).
#[async_trait]
pub trait RemoteConfigSource: Send + Sync {
    async fn config_for(&self, name: &str) -> RemoteConfigOverrides;
}

/// A `RemoteConfigSource` with no overrides; used when no delivery system is
/// wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRemoteConfigSource;

#[async_trait]
impl RemoteConfigSource for NoopRemoteConfigSource {
    async fn config_for(&self, _name: &str) -> RemoteConfigOverrides {
        RemoteConfigOverrides::default()
    }
}

/// A `RemoteConfigSource` backed by a fixed, in-process map — the Rust
/// analogue of a hard-coded `distributed_config` dict wired in for a single
/// deployment without a real config delivery system.
#[derive(Debug, Default, Clone)]
pub struct StaticConfigSource {
    overrides: std::collections::HashMap<String, RemoteConfigOverrides>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, name: impl Into<String>, overrides: RemoteConfigOverrides) -> Self {
        self.overrides.insert(name.into(), overrides);
        self
    }
}

#[async_trait]
impl RemoteConfigSource for StaticConfigSource {
    async fn config_for(&self, name: &str) -> RemoteConfigOverrides {
        self.overrides.get(name).copied().unwrap_or_default()
    }
}

/// External collaborator (§6): per-call feature-flag check. Must be fast and
/// must never raise.
pub trait FeatureFlagSource: Send + Sync {
    fn enabled(&self, name: &str) -> bool;
}

/// A `FeatureFlagSource` that always admits; the default when no flag
/// delivery system is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeatureFlagSource;

impl FeatureFlagSource for NoopFeatureFlagSource {
    fn enabled(&self, _name: &str) -> bool {
        true
    }
}
