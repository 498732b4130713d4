//! Position sources
//!
//! A [`PositionSource`] offers two operations: an indefinite, cancelable
//! stream of best-effort fixes and a one-shot, higher-effort fix. Neither
//! carries business logic, and failures are reported as values, never
//! retried here.

use crate::fix::PositionFix;
use carevisit_geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a position could not be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location services unavailable")]
    SensorUnavailable,
    #[error("timed out waiting for a location")]
    Timeout,
}

/// Delivered to a stream callback
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Fix(PositionFix),
    Error(PositionError),
}

/// Stream callback handed to [`PositionSource::watch`]
pub type WatchCallback = Box<dyn FnMut(WatchEvent) + Send + 'static>;

/// A provider of device positions
pub trait PositionSource: Send + Sync + 'static {
    /// Start the continuous stream.
    ///
    /// On denied permission or an unavailable sensor the callback receives
    /// exactly one [`WatchEvent::Error`] and never a fix.
    fn watch(&self, on_event: WatchCallback) -> Subscription;

    /// Request one precise fix. Always resolves; failures come back as values.
    fn precise_fix(&self) -> impl Future<Output = Result<PositionFix, PositionError>> + Send;
}

impl<S: PositionSource> PositionSource for Arc<S> {
    fn watch(&self, on_event: WatchCallback) -> Subscription {
        (**self).watch(on_event)
    }

    fn precise_fix(&self) -> impl Future<Output = Result<PositionFix, PositionError>> + Send {
        (**self).precise_fix()
    }
}

/// Exclusive handle to an active stream
///
/// Releasing is idempotent and also happens on drop.
pub struct Subscription {
    id: u64,
    on_release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    /// Wrap a stream whose teardown is `on_release`
    pub fn new(id: u64, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// A subscription to a stream that never started
    pub fn inert(id: u64) -> Self {
        Self { id, on_release: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True until the first release
    pub fn is_active(&self) -> bool {
        self.on_release.is_some()
    }

    /// Stop the stream. Further calls do nothing.
    pub fn release(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            debug!(subscription = self.id, "Releasing position stream");
            on_release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Bounded precise fix
// ============================================================================

/// Wraps a source so its precise fix resolves to [`PositionError::Timeout`]
/// once `timeout` elapses
#[derive(Debug, Clone)]
pub struct TimeoutSource<S> {
    inner: S,
    timeout: Duration,
}

/// Bound the precise request of `inner`
pub fn with_precise_timeout<S: PositionSource>(inner: S, timeout: Duration) -> TimeoutSource<S> {
    TimeoutSource { inner, timeout }
}

impl<S> TimeoutSource<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: PositionSource> PositionSource for TimeoutSource<S> {
    fn watch(&self, on_event: WatchCallback) -> Subscription {
        self.inner.watch(on_event)
    }

    fn precise_fix(&self) -> impl Future<Output = Result<PositionFix, PositionError>> + Send {
        let timeout = self.timeout;
        let request = self.inner.precise_fix();
        async move {
            match tokio::time::timeout(timeout, request).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Precise fix timed out");
                    Err(PositionError::Timeout)
                }
            }
        }
    }
}

// ============================================================================
// Manual source
// ============================================================================

/// Location permission as seen by a [`ManualSource`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    Granted,
    Denied,
    Unavailable,
}

impl Permission {
    fn denial(self) -> Option<PositionError> {
        match self {
            Self::Granted => None,
            Self::Denied => Some(PositionError::PermissionDenied),
            Self::Unavailable => Some(PositionError::SensorUnavailable),
        }
    }
}

/// Scripted answer to the next precise request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreciseOutcome {
    Fix(Coordinate),
    Fail(PositionError),
    /// Never resolves; pair with [`with_precise_timeout`]
    Hang,
}

struct Watcher {
    id: u64,
    on_event: WatchCallback,
}

#[derive(Default)]
struct ManualState {
    permission: Permission,
    watcher: Option<Watcher>,
    next_id: u64,
    watches: usize,
    releases: usize,
    precise_requests: usize,
    precise_queue: VecDeque<PreciseOutcome>,
    last_fix: Option<Coordinate>,
}

/// A position source driven by the caller
///
/// Used by tests and by the field CLI to replay traces. Clones share state,
/// so one clone can be handed to a session while another drives it.
///
/// With nothing scripted, a precise request answers with the last emitted
/// stream coordinate, or times out if none was emitted.
#[derive(Clone, Default)]
pub struct ManualSource {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the permission seen by subsequent requests
    pub fn set_permission(&self, permission: Permission) {
        self.lock().permission = permission;
    }

    /// Deliver a continuous fix to the active stream, if any
    pub fn emit_fix(&self, coordinate: Coordinate) -> bool {
        let mut state = self.lock();
        state.last_fix = Some(coordinate);
        match state.watcher.as_mut() {
            Some(watcher) => {
                (watcher.on_event)(WatchEvent::Fix(PositionFix::continuous(coordinate)));
                true
            }
            None => false,
        }
    }

    /// Fail the active stream. The stream ends; releasing it later is a no-op.
    pub fn emit_error(&self, error: PositionError) -> bool {
        let watcher = self.lock().watcher.take();
        match watcher {
            Some(mut watcher) => {
                (watcher.on_event)(WatchEvent::Error(error));
                true
            }
            None => false,
        }
    }

    /// Queue the answer to a future precise request
    pub fn push_precise(&self, outcome: PreciseOutcome) {
        self.lock().precise_queue.push_back(outcome);
    }

    /// Whether a stream is currently delivering
    pub fn is_watching(&self) -> bool {
        self.lock().watcher.is_some()
    }

    /// Number of `watch` calls so far
    pub fn watch_count(&self) -> usize {
        self.lock().watches
    }

    /// Number of subscriptions released so far
    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    /// Number of precise requests so far
    pub fn precise_request_count(&self) -> usize {
        self.lock().precise_requests
    }
}

impl PositionSource for ManualSource {
    fn watch(&self, mut on_event: WatchCallback) -> Subscription {
        let mut state = self.lock();
        state.next_id += 1;
        state.watches += 1;
        let id = state.next_id;

        if let Some(error) = state.permission.denial() {
            drop(state);
            on_event(WatchEvent::Error(error));
            return Subscription::inert(id);
        }

        state.watcher = Some(Watcher { id, on_event });
        drop(state);

        let shared = Arc::downgrade(&self.state);
        Subscription::new(id, move || {
            if let Some(shared) = shared.upgrade() {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                // A stream that already ended has nothing left to release
                if state.watcher.as_ref().is_some_and(|w| w.id == id) {
                    state.watcher = None;
                    state.releases += 1;
                }
            }
        })
    }

    fn precise_fix(&self) -> impl Future<Output = Result<PositionFix, PositionError>> + Send {
        let outcome = {
            let mut state = self.lock();
            state.precise_requests += 1;
            match state.permission.denial() {
                Some(error) => Some(PreciseOutcome::Fail(error)),
                None => state
                    .precise_queue
                    .pop_front()
                    .or_else(|| state.last_fix.map(PreciseOutcome::Fix)),
            }
        };

        async move {
            match outcome {
                Some(PreciseOutcome::Fix(coordinate)) => Ok(PositionFix::precise(coordinate)),
                Some(PreciseOutcome::Fail(error)) => Err(error),
                Some(PreciseOutcome::Hang) => std::future::pending().await,
                None => Err(PositionError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::AccuracyClass;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector() -> (Arc<Mutex<Vec<WatchEvent>>>, WatchCallback) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, Box::new(move |e| sink.lock().unwrap().push(e)))
    }

    #[test]
    fn test_release_twice_runs_teardown_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut sub = Subscription::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.release();
        sub.release();
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Subscription::new(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inert_subscription() {
        let mut sub = Subscription::inert(3);
        assert!(!sub.is_active());
        sub.release();
        assert_eq!(sub.id(), 3);
    }

    #[test]
    fn test_manual_stream_delivers_until_released() {
        let source = ManualSource::new();
        let (events, callback) = collector();
        let mut sub = source.watch(callback);

        assert!(source.emit_fix(Coordinate::new(0.0, 0.0005)));
        sub.release();
        assert!(!source.emit_fix(Coordinate::new(0.0, 0.0)));
        sub.release();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            WatchEvent::Fix(PositionFix { accuracy: AccuracyClass::Continuous, .. })
        ));
        assert_eq!(source.release_count(), 1);
        assert!(!source.is_watching());
    }

    #[test]
    fn test_denied_permission_errors_once() {
        let source = ManualSource::new();
        source.set_permission(Permission::Denied);
        let (events, callback) = collector();
        let sub = source.watch(callback);

        assert!(!sub.is_active());
        assert!(!source.emit_fix(Coordinate::new(0.0, 0.0)));
        assert_eq!(
            *events.lock().unwrap(),
            vec![WatchEvent::Error(PositionError::PermissionDenied)]
        );

        drop(sub);
        assert_eq!(source.release_count(), 0);
    }

    #[test]
    fn test_stream_error_ends_stream() {
        let source = ManualSource::new();
        let (events, callback) = collector();
        let mut sub = source.watch(callback);

        assert!(source.emit_error(PositionError::SensorUnavailable));
        assert!(!source.emit_fix(Coordinate::new(0.0, 0.0)));
        sub.release();

        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(!source.is_watching());
        assert_eq!(source.release_count(), 0);

        let (_, callback) = collector();
        let mut next = source.watch(callback);
        assert!(source.emit_error(PositionError::Timeout));
        drop(sub);
        next.release();
        assert_eq!(source.release_count(), 0);
        assert_eq!(source.watch_count(), 2);
    }

    #[tokio::test]
    async fn test_precise_queue_order() {
        let source = ManualSource::new();
        source.push_precise(PreciseOutcome::Fix(Coordinate::new(0.0, 0.0003)));
        source.push_precise(PreciseOutcome::Fail(PositionError::Timeout));

        let first = source.precise_fix().await.unwrap();
        assert_eq!(first.coordinate, Coordinate::new(0.0, 0.0003));
        assert_eq!(first.accuracy, AccuracyClass::Precise);
        assert_eq!(source.precise_fix().await, Err(PositionError::Timeout));
        assert_eq!(source.precise_request_count(), 2);
    }

    #[tokio::test]
    async fn test_precise_falls_back_to_last_stream_fix() {
        let source = ManualSource::new();
        assert_eq!(source.precise_fix().await, Err(PositionError::Timeout));

        source.emit_fix(Coordinate::new(1.0, 2.0));
        let fix = source.precise_fix().await.unwrap();
        assert_eq!(fix.coordinate, Coordinate::new(1.0, 2.0));
    }

    #[tokio::test]
    async fn test_precise_timeout_bounds_hang() {
        let manual = ManualSource::new();
        manual.push_precise(PreciseOutcome::Hang);
        let source = with_precise_timeout(manual, Duration::from_millis(20));

        assert_eq!(source.precise_fix().await, Err(PositionError::Timeout));
        assert_eq!(source.inner().precise_request_count(), 1);
    }
}
