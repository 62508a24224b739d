//! C7: Call Wrapper — admission check, call, result classification, and
//! state update around one protected call (§4.7), plus the lazy-sequence
//! variant and the imperative scoped-guard variant from the caller-facing
//! interface (§6).
//!
//! `fallback` and `failureClassifier` are typed per call site rather than
//! stored on the shared [`crate::BreakerConfig`] — see that module's doc
//! comment and `DESIGN.md` for why.

use crate::error::BreakerError;
use crate::strategy::Strategy;
use futures_util::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Per-call-site options for [`wrap`] (§6: `openThreshold`/`closeThreshold`/
/// `recoveryTimeoutSeconds` live on [`crate::BreakerConfig`] instead, applied
/// once at registry creation — only the genuinely per-call, per-type pieces
/// live here).
pub struct WrapOptions<T, E> {
    fallback: Option<Arc<dyn Fn() -> T + Send + Sync>>,
    failure_classifier: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<T, E> fmt::Debug for WrapOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapOptions")
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E> Default for WrapOptions<T, E> {
    fn default() -> Self {
        Self {
            fallback: None,
            failure_classifier: Arc::new(|_| true),
        }
    }
}

impl<T, E> WrapOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked when a call is rejected instead of surfacing
    /// [`BreakerError::Rejected`] (§3, §6).
    pub fn fallback(mut self, fallback: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Predicate mapping an error to "counts as a failure" (§3). Defaults to
    /// "any error is a failure".
    pub fn failure_classifier(mut self, classifier: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.failure_classifier = Arc::new(classifier);
        self
    }
}

/// A breaker bound to one call shape, returned by [`wrap`]. Cheap to clone;
/// `strategy` is an `Arc` and `options`' closures are `Arc`s.
pub struct Wrapped<T, E> {
    strategy: Arc<Strategy>,
    options: WrapOptions<T, E>,
}

impl<T, E> Clone for Wrapped<T, E> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy.clone(),
            options: WrapOptions {
                fallback: self.options.fallback.clone(),
                failure_classifier: self.options.failure_classifier.clone(),
            },
        }
    }
}

/// `wrap(name, options?) -> (f -> wrappedF)` (§6). Rust's generics can't let
/// a single call produce a closure generic over every possible `F`, so
/// `wrap` instead returns a reusable [`Wrapped`] gate; call
/// [`Wrapped::call`] with each protected invocation.
pub fn wrap<T, E>(strategy: Arc<Strategy>, options: WrapOptions<T, E>) -> Wrapped<T, E> {
    Wrapped { strategy, options }
}

impl<T, E> Wrapped<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Implements the three-step protocol from §4.7.
    pub async fn call<F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.strategy.is_enabled() {
            return f().await.map_err(BreakerError::Call);
        }

        if !self.strategy.should_admit() {
            if let Some(fallback) = &self.options.fallback {
                return Ok(fallback());
            }
            return Err(self.rejection());
        }

        match f().await {
            Ok(value) => {
                self.strategy.on_success().await;
                Ok(value)
            }
            Err(err) => {
                if (self.options.failure_classifier)(&err) {
                    self.strategy.on_failure(err.to_string()).await;
                } else {
                    self.strategy.on_success().await;
                }
                Err(BreakerError::Call(err))
            }
        }
    }

    fn rejection(&self) -> BreakerError<E> {
        let snap = self.strategy.state_snapshot();
        BreakerError::Rejected {
            name: snap.name,
            failure_count: snap.failure_count,
            seconds_remaining: snap.seconds_until_recovery,
            last_failure: snap.last_failure,
        }
    }

    /// Wraps a lazy sequence (§4.7 lazy-sequence variant, §9): admission
    /// happens once, at first demand; termination (`None`) is classified as
    /// a success, and an error mid-iteration as a single failure. Further
    /// elements are never separate admission events.
    pub fn call_stream<S>(&self, inner: S) -> GatedStream<T, E>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        GatedStream {
            strategy: self.strategy.clone(),
            failure_classifier: self.options.failure_classifier.clone(),
            inner: Box::pin(inner),
            admitted: false,
            finished: false,
        }
    }
}

/// The lazy-sequence variant of [`Wrapped::call`]. Polls `inner` unchanged
/// once admitted; classification on termination is fire-and-forget since
/// [`Stream::poll_next`] cannot itself await the strategy's async outcome
/// recording.
pub struct GatedStream<T, E> {
    strategy: Arc<Strategy>,
    failure_classifier: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    inner: Pin<Box<dyn Stream<Item = Result<T, E>> + Send>>,
    admitted: bool,
    finished: bool,
}

impl<T, E> Stream for GatedStream<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<T, BreakerError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if !self.admitted {
            self.admitted = true;
            if !self.strategy.should_admit() {
                self.finished = true;
                let snap = self.strategy.state_snapshot();
                return Poll::Ready(Some(Err(BreakerError::Rejected {
                    name: snap.name,
                    failure_count: snap.failure_count,
                    seconds_remaining: snap.seconds_until_recovery,
                    last_failure: snap.last_failure,
                })));
            }
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.finished = true;
                let strategy = self.strategy.clone();
                tokio::spawn(async move { strategy.on_success().await });
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Err(err))) => {
                self.finished = true;
                let is_failure = (self.failure_classifier)(&err);
                let description = err.to_string();
                let strategy = self.strategy.clone();
                if is_failure {
                    tokio::spawn(async move { strategy.on_failure(description).await });
                } else {
                    tokio::spawn(async move { strategy.on_success().await });
                }
                Poll::Ready(Some(Err(BreakerError::Call(err))))
            }
        }
    }
}

/// The imperative gate from §6: `use(name)` admits on entry; the returned
/// guard reports an outcome exactly once, on drop, based on whether
/// [`UseGuard::fail`] was called. Not calling `fail` before drop (i.e. the
/// guarded scope ran to completion) is classified as a success. Recording is
/// fire-and-forget for the same reason as [`GatedStream`]: `Drop` cannot
/// await.
pub struct UseGuard<E> {
    strategy: Arc<Strategy>,
    failure_classifier: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    outcome: Option<E>,
}

impl<E> UseGuard<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Marks the guarded scope as having produced a classified outcome.
    /// Exiting with an error the classifier rejects still counts as a
    /// success, per §4.7.
    pub fn fail(&mut self, err: E) {
        self.outcome = Some(err);
    }
}

impl<E> Drop for UseGuard<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let strategy = self.strategy.clone();
        match self.outcome.take() {
            None => {
                tokio::spawn(async move { strategy.on_success().await });
            }
            Some(err) => {
                if (self.failure_classifier)(&err) {
                    let description = err.to_string();
                    tokio::spawn(async move { strategy.on_failure(description).await });
                } else {
                    tokio::spawn(async move { strategy.on_success().await });
                }
            }
        }
    }
}

/// Enters the imperative gate (§6). Returns `Err` immediately, without
/// creating a guard, when admission is denied — matching §4.4's invariant
/// that no outcome is recorded for a rejected call.
pub fn use_scope<E>(
    strategy: Arc<Strategy>,
    failure_classifier: impl Fn(&E) -> bool + Send + Sync + 'static,
) -> Result<UseGuard<E>, BreakerError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    if strategy.should_admit() {
        Ok(UseGuard {
            strategy,
            failure_classifier: Arc::new(failure_classifier),
            outcome: None,
        })
    } else {
        let snap = strategy.state_snapshot();
        Err(BreakerError::Rejected {
            name: snap.name,
            failure_count: snap.failure_count,
            seconds_remaining: snap.seconds_until_recovery,
            last_failure: snap.last_failure,
        })
    }
}
