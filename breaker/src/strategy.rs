//! C5: Breaker Strategy — binds configuration, the local buffer (C1), the
//! shared store (C2) through the aggregator (C3), and the state machine
//! (C4) to a single named breaker (§4.5).

use crate::aggregator::{AggregateView, WindowAggregator};
use crate::buffer::LocalBuffer;
use crate::clock::{MonotonicClock, WallClock};
use crate::config::{BreakerConfig, FeatureFlagSource, NoopFeatureFlagSource};
use crate::state::{should_close, should_trip, BreakerStateMachine, State, StateSnapshot};
use crate::store::WindowStore;
use std::sync::Arc;

/// A debugging view of one breaker's current posture (§4.5).
#[derive(Debug, Clone)]
pub struct StrategySnapshot {
    pub name: String,
    pub state: State,
    pub failure_count: u64,
    pub seconds_until_recovery: i64,
    pub last_failure: Option<String>,
    pub open_threshold: f64,
    pub close_threshold: f64,
}

/// The per-breaker object returned by the registry (C6) and driven by the
/// call wrapper (C7).
pub struct Strategy {
    config: BreakerConfig,
    buffer: Arc<LocalBuffer>,
    aggregator: WindowAggregator,
    state: BreakerStateMachine,
    feature_flags: Arc<dyn FeatureFlagSource>,
    monotonic_clock: Arc<dyn MonotonicClock>,
}

impl Strategy {
    pub fn new(
        config: BreakerConfig,
        store: Arc<dyn WindowStore>,
        wall_clock: Arc<dyn WallClock>,
        monotonic_clock: Arc<dyn MonotonicClock>,
        feature_flags: Arc<dyn FeatureFlagSource>,
    ) -> Self {
        let buffer = Arc::new(LocalBuffer::new(wall_clock.now().timestamp()));
        let aggregator = WindowAggregator::new(
            config.name().to_string(),
            config.window_seconds(),
            config.read_delay_seconds(),
            store,
            buffer.clone(),
            wall_clock,
        );
        Self {
            config,
            buffer,
            aggregator,
            state: BreakerStateMachine::new(),
            feature_flags,
            monotonic_clock,
        }
    }

    /// Convenience constructor with no feature-flag gating.
    pub fn always_enabled(
        config: BreakerConfig,
        store: Arc<dyn WindowStore>,
        wall_clock: Arc<dyn WallClock>,
        monotonic_clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        Self::new(config, store, wall_clock, monotonic_clock, Arc::new(NoopFeatureFlagSource))
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn now_monotonic(&self) -> u64 {
        self.monotonic_clock.now_secs()
    }

    /// Whether the feature-flag interface currently admits this breaker at
    /// all (§4.5, §6). When `false`, the breaker is a pass-through: the
    /// call wrapper skips admission entirely and no outcome is recorded.
    pub fn is_enabled(&self) -> bool {
        self.feature_flags.enabled(self.config.name())
    }

    /// Applies the C4 admission rule (§4.4). When the breaker is disabled
    /// via the feature-flag interface, this is always `true` and records
    /// nothing (§4.5 pass-through).
    pub fn should_admit(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let admitted = !self.state.is_open(self.now_monotonic(), self.config.recovery_timeout_seconds());
        metrics::counter!(
            "breaker_admission_total",
            "name" => self.config.name().to_string(),
            "result" => if admitted { "admitted" } else { "rejected" },
        )
        .increment(1);
        admitted
    }

    /// Records a success and evaluates both trip directions (§4.5): success
    /// lowers the ratio, so it can close an OPEN breaker, but a success
    /// alone can't retrip an already-closed one except through the shared
    /// aggregate crossing `openThreshold` from other traffic.
    pub async fn on_success(&self) {
        if !self.is_enabled() {
            return;
        }
        self.buffer.record_success();
        metrics::counter!("breaker_outcomes_total", "name" => self.config.name().to_string(), "outcome" => "success")
            .increment(1);
        let view = self.aggregator.view().await;
        self.record_failure_ratio_gauge(view);
        self.evaluate_closed_to_open(view).await;
        self.evaluate_open_to_closed(view).await;
    }

    /// Records a classified failure and evaluates the CLOSED -> OPEN rule
    /// (§4.5). A failure observed while already OPEN does not by itself
    /// close the breaker; only the timer or a subsequent success does.
    pub async fn on_failure(&self, failure_description: String) {
        if !self.is_enabled() {
            return;
        }
        self.buffer.record_failure();
        self.state.record_last_failure(failure_description);
        metrics::counter!("breaker_outcomes_total", "name" => self.config.name().to_string(), "outcome" => "failure")
            .increment(1);
        let view = self.aggregator.view().await;
        self.record_failure_ratio_gauge(view);
        self.evaluate_closed_to_open(view).await;
    }

    /// Publishes the current fleet-wide aggregate failure ratio (§10.3) every
    /// time a fresh [`AggregateView`] is computed.
    fn record_failure_ratio_gauge(&self, view: AggregateView) {
        metrics::gauge!("breaker_failure_ratio", "name" => self.config.name().to_string())
            .set(view.failure_ratio());
    }

    async fn evaluate_closed_to_open(&self, view: AggregateView) {
        let now = self.now_monotonic();
        if self.state.current_state(now, self.config.recovery_timeout_seconds()) != State::Closed {
            return;
        }
        if should_trip(
            view.total_events,
            view.total_failures,
            self.config.min_requests(),
            self.config.open_threshold(),
        ) && self.state.trip(now)
        {
            self.buffer.reset(now as i64);
            tracing::info!(
                breaker = self.config.name(),
                total_events = view.total_events,
                total_failures = view.total_failures,
                "breaker tripped open"
            );
            metrics::counter!("breaker_state_transitions_total", "name" => self.config.name().to_string(), "to" => "open")
                .increment(1);
        }
    }

    async fn evaluate_open_to_closed(&self, view: AggregateView) {
        let now = self.now_monotonic();
        if self.state.current_state(now, self.config.recovery_timeout_seconds()) != State::Open {
            return;
        }
        if should_close(view.total_events, view.total_failures, self.config.close_threshold())
            && self.state.close()
        {
            tracing::info!(breaker = self.config.name(), "breaker closed on improved ratio");
            metrics::counter!("breaker_state_transitions_total", "name" => self.config.name().to_string(), "to" => "closed")
                .increment(1);
        }
    }

    pub fn state_snapshot(&self) -> StrategySnapshot {
        let StateSnapshot {
            state,
            failure_count,
            seconds_until_recovery,
            last_failure,
        } = self.state.snapshot(self.now_monotonic(), self.config.recovery_timeout_seconds());

        StrategySnapshot {
            name: self.config.name().to_string(),
            state,
            failure_count,
            seconds_until_recovery,
            last_failure,
            open_threshold: self.config.open_threshold(),
            close_threshold: self.config.close_threshold(),
        }
    }
}
