//! Error taxonomy for the breaker crate (§7).
//!
//! Three categories live in three places: [`BreakerError`] is the only error
//! type that ever reaches a caller of [`crate::wrap`] or
//! [`crate::Strategy::handle`]; internal-recovered conditions (store
//! unreachable, malformed bucket timestamp, config-source failure) are
//! logged via `tracing` and never surface as a `Result`; fatal configuration
//! errors are raised by [`crate::BreakerConfig::build`] before a strategy is
//! ever registered, so a caller can never install a broken breaker.

use thiserror::Error;

/// The only error this crate ever returns to a caller of a wrapped call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Admission was denied and no fallback was configured.
    #[error("circuit \"{name}\" is open ({failure_count} failures, {seconds_remaining}s until recovery)")]
    Rejected {
        name: String,
        failure_count: u64,
        seconds_remaining: i64,
        last_failure: Option<String>,
    },
    /// The wrapped call itself failed; re-surfaced unchanged.
    #[error(transparent)]
    Call(#[from] E),
}

impl<E> BreakerError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Rejected { .. })
    }
}

/// Fatal, programmer-facing configuration errors (§7 f/g/h). These are
/// raised synchronously at configuration time and never wrapped in a
/// `BreakerError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("breaker name must not be empty")]
    EmptyName,

    #[error("closeThreshold ({close}) must be <= openThreshold ({open})")]
    InvalidHysteresis { close: String, open: String },

    #[error("windowSeconds must be > 0")]
    InvalidWindow,

    #[error("minRequests must be >= 1")]
    InvalidMinRequests,

    #[error("recoveryTimeoutSeconds must be > 0")]
    InvalidRecoveryTimeout,

    #[error("openThreshold must be in (0, 1]")]
    InvalidOpenThreshold,

    #[error("closeThreshold must be in (0, 1]")]
    InvalidCloseThreshold,
}
