//! The check-in state machine
//!
//! Transitions are pure: `(session, event) -> (session, effects)`. The
//! controller performs the effects and feeds their results back as events.
//! Stream subscriptions, precise requests and writes are tagged with ids so a
//! late result for something the session already moved past is ignored.
//!
//! ```text
//! Loading ─▶ Tracking(too_far ⇄ in_range) ─tap─▶ AcquiringPreciseFix ─fix─▶ Verifying ─ack─▶ Success
//!    │                 │                                │                      │
//!    └─────────────────┴──────────▶ Error ◀─────────────┴──────────────────────┘
//! ```
//!
//! `retry()` leaves `Error` for `Loading`, `Tracking` or `Verifying` depending
//! on what failed. Fallback and screen exit end the session outside the
//! status set.

use crate::fix::PositionFix;
use crate::source::PositionError;
use crate::store::{StoreError, VisitTarget};
use crate::tracker::{Proximity, ProximityReading};
use carevisit_core::ErrorCode;
use carevisit_geo::{
    distance_meters, format_distance_in, is_within_radius, Coordinate, DistanceUnits,
    CHECK_IN_RADIUS_M,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// User-visible lifecycle of a check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Loading,
    Tracking(Proximity),
    AcquiringPreciseFix,
    Verifying,
    Success,
    Error(CheckInError),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Tracking(p) => write!(f, "tracking({p})"),
            Self::AcquiringPreciseFix => write!(f, "acquiring_precise_fix"),
            Self::Verifying => write!(f, "verifying"),
            Self::Success => write!(f, "success"),
            Self::Error(e) => write!(f, "error({})", e.kind),
        }
    }
}

/// States in which continuous fixes never cause a transition
pub fn is_locked(status: &Status) -> bool {
    matches!(
        status,
        Status::AcquiringPreciseFix | Status::Verifying | Status::Success
    )
}

// ============================================================================
// Errors
// ============================================================================

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    SensorUnavailable,
    Timeout,
    OutOfRange,
    PersistenceFailure,
    LoadFailure,
}

impl ErrorKind {
    /// The recovery `retry()` performs
    pub fn recovery(self) -> Recovery {
        match self {
            Self::PermissionDenied | Self::SensorUnavailable | Self::Timeout | Self::OutOfRange => {
                Recovery::RetryTracking
            }
            Self::PersistenceFailure => Recovery::RetryWrite,
            Self::LoadFailure => Recovery::RetryLoad,
        }
    }

    pub fn code(self) -> ErrorCode {
        match self {
            Self::PermissionDenied => ErrorCode::LocationPermissionDenied,
            Self::SensorUnavailable => ErrorCode::SensorUnavailable,
            Self::Timeout => ErrorCode::PreciseFixTimeout,
            Self::OutOfRange => ErrorCode::OutOfRange,
            Self::PersistenceFailure => ErrorCode::VisitWriteFailed,
            Self::LoadFailure => ErrorCode::VisitLoadFailed,
        }
    }
}

impl From<PositionError> for ErrorKind {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::PermissionDenied => Self::PermissionDenied,
            PositionError::SensorUnavailable => Self::SensorUnavailable,
            PositionError::Timeout => Self::Timeout,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PermissionDenied => "permission_denied",
            Self::SensorUnavailable => "sensor_unavailable",
            Self::Timeout => "timeout",
            Self::OutOfRange => "out_of_range",
            Self::PersistenceFailure => "persistence_failure",
            Self::LoadFailure => "load_failure",
        };
        f.write_str(name)
    }
}

/// How an error is retried. The fallback exit is available for every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Release the stream and watch again
    RetryTracking,
    /// Re-submit the write with the already verified fix
    RetryWrite,
    /// Read the visit again
    RetryLoad,
}

/// An error shown on the check-in screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct CheckInError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CheckInError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The continuous stream failed
    pub fn stream(err: PositionError) -> Self {
        Self::new(err.into(), err.to_string())
    }

    /// The one-shot precise request failed
    pub fn precise(err: PositionError) -> Self {
        let message = match err {
            PositionError::Timeout => "could not obtain precise location".to_string(),
            other => format!("could not obtain precise location: {other}"),
        };
        Self::new(err.into(), message)
    }

    /// The precise fix put the worker outside the radius
    pub fn out_of_range(distance_m: f64, units: DistanceUnits) -> Self {
        Self::new(
            ErrorKind::OutOfRange,
            format!("too far: {}", format_distance_in(distance_m, units)),
        )
    }

    pub fn write_failed(err: &StoreError) -> Self {
        Self::new(ErrorKind::PersistenceFailure, format!("write failed: {err}"))
    }

    pub fn load_failed(err: &StoreError) -> Self {
        Self::new(ErrorKind::LoadFailure, format!("could not load visit: {err}"))
    }

    pub fn recovery(&self) -> Recovery {
        self.kind.recovery()
    }
}

impl From<&CheckInError> for carevisit_core::Error {
    fn from(err: &CheckInError) -> Self {
        let suggestion = match err.recovery() {
            Recovery::RetryTracking => "Retry tracking, or use the alternate check-in",
            Recovery::RetryWrite => "Retry saving the check-in, or use the alternate check-in",
            Recovery::RetryLoad => "Reload the visit, or use the alternate check-in",
        };
        carevisit_core::Error::new(err.kind.code(), err.message.clone()).with_suggestion(suggestion)
    }
}

// ============================================================================
// Session, events, effects
// ============================================================================

/// How a session ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exit {
    /// Handed over to alternate verification
    Fallback,
    /// Screen closed
    Closed,
}

/// User actions valid in the current state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actions {
    pub check_in: bool,
    pub retry: bool,
    pub fallback: bool,
}

/// Inputs to [`transition`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TargetLoaded(VisitTarget),
    TargetFailed(StoreError),
    /// A classified continuous fix from stream `generation`
    Reading {
        generation: u64,
        reading: ProximityReading,
    },
    StreamError {
        generation: u64,
        error: PositionError,
    },
    AttemptCheckIn,
    PreciseResult {
        attempt: u64,
        result: Result<PositionFix, PositionError>,
    },
    WriteResult {
        attempt: u64,
        result: Result<(), StoreError>,
    },
    Retry,
    Fallback,
    Exit,
}

impl Event {
    /// Whether the event came from the continuous stream
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Reading { .. } | Self::StreamError { .. })
    }
}

/// Work the controller must perform
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    LoadTarget,
    Subscribe { generation: u64, target: Coordinate },
    Release { generation: u64 },
    RequestPreciseFix { attempt: u64 },
    /// The single visit update
    Write { attempt: u64, fix: PositionFix },
    OpenFallback,
}

/// State of one check-in screen
#[derive(Debug, Clone, PartialEq)]
pub struct CheckInSession {
    pub visit_id: String,
    pub status: Status,
    pub target: Option<VisitTarget>,
    pub last_known_distance_m: Option<f64>,
    /// Generation of the active stream; at most one
    pub subscription: Option<u64>,
    /// The precise fix that passed verification, kept for write retries
    pub verified_fix: Option<PositionFix>,
    /// Stream failure seen while the session could not react to it
    pub stream_warning: Option<String>,
    pub exit: Option<Exit>,
    pub units: DistanceUnits,
    generation: u64,
    attempt: u64,
}

impl CheckInSession {
    pub fn new(visit_id: impl Into<String>, units: DistanceUnits) -> Self {
        Self {
            visit_id: visit_id.into(),
            status: Status::Loading,
            target: None,
            last_known_distance_m: None,
            subscription: None,
            verified_fix: None,
            stream_warning: None,
            exit: None,
            units,
            generation: 0,
            attempt: 0,
        }
    }

    /// A new session and the effects that start it
    pub fn begin(visit_id: impl Into<String>, units: DistanceUnits) -> (Self, Vec<Effect>) {
        (Self::new(visit_id, units), vec![Effect::LoadTarget])
    }

    /// Success reached or the screen left; no event changes it any more
    pub fn is_finished(&self) -> bool {
        self.exit.is_some() || self.status == Status::Success
    }

    /// Tracking has started but no fix arrived yet
    pub fn locating(&self) -> bool {
        matches!(self.status, Status::Tracking(_)) && self.last_known_distance_m.is_none()
    }

    pub fn error(&self) -> Option<&CheckInError> {
        match &self.status {
            Status::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn actions(&self) -> Actions {
        if self.exit.is_some() {
            return Actions::default();
        }
        let tracking = matches!(self.status, Status::Tracking(_));
        let error = matches!(self.status, Status::Error(_));
        Actions {
            check_in: self.status == Status::Tracking(Proximity::InRange),
            retry: error,
            fallback: tracking || error,
        }
    }

    /// Apply one event in place, returning the effects to perform
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.exit.is_some() {
            debug!(visit_id = %self.visit_id, ?event, "Session ended, ignoring event");
            return effects;
        }

        match event {
            Event::TargetLoaded(target) => self.on_target_loaded(target, &mut effects),
            Event::TargetFailed(err) => {
                if self.status == Status::Loading {
                    self.status = Status::Error(CheckInError::load_failed(&err));
                }
            }
            Event::Reading { generation, reading } => self.on_reading(generation, &reading),
            Event::StreamError { generation, error } => self.on_stream_error(generation, error),
            Event::AttemptCheckIn => {
                if self.status == Status::Tracking(Proximity::InRange) {
                    self.attempt += 1;
                    self.status = Status::AcquiringPreciseFix;
                    effects.push(Effect::RequestPreciseFix {
                        attempt: self.attempt,
                    });
                } else {
                    debug!(status = %self.status, "Check-in not available, ignoring tap");
                }
            }
            Event::PreciseResult { attempt, result } => {
                if self.status != Status::AcquiringPreciseFix || attempt != self.attempt {
                    debug!(attempt, current = self.attempt, "Stale precise result ignored");
                } else {
                    self.on_precise(attempt, result, &mut effects);
                }
            }
            Event::WriteResult { attempt, result } => {
                if self.status != Status::Verifying || attempt != self.attempt {
                    debug!(attempt, current = self.attempt, "Stale write result ignored");
                } else {
                    self.status = match result {
                        Ok(()) => Status::Success,
                        Err(err) => Status::Error(CheckInError::write_failed(&err)),
                    };
                }
            }
            Event::Retry => self.on_retry(&mut effects),
            Event::Fallback => {
                if matches!(self.status, Status::Tracking(_) | Status::Error(_)) {
                    self.release(&mut effects);
                    self.exit = Some(Exit::Fallback);
                    effects.push(Effect::OpenFallback);
                }
            }
            Event::Exit => {
                self.release(&mut effects);
                self.exit = Some(Exit::Closed);
            }
        }

        effects
    }

    fn on_target_loaded(&mut self, target: VisitTarget, effects: &mut Vec<Effect>) {
        if self.status != Status::Loading {
            debug!(visit_id = %target.visit_id, "Late visit load ignored");
            return;
        }
        if let Err(err) = target.ensure_scheduled() {
            self.status = Status::Error(CheckInError::load_failed(&err));
            return;
        }
        let location = target.location;
        self.target = Some(target);
        self.start_tracking(location, effects);
    }

    fn on_reading(&mut self, generation: u64, reading: &ProximityReading) {
        if self.subscription != Some(generation) {
            debug!(generation, "Fix from a released stream ignored");
            return;
        }
        if !reading.distance_m.is_nan() {
            self.last_known_distance_m = Some(reading.distance_m);
        }
        if let Status::Tracking(_) = self.status {
            self.status = Status::Tracking(reading.proximity);
        }
    }

    fn on_stream_error(&mut self, generation: u64, error: PositionError) {
        if self.subscription != Some(generation) {
            debug!(generation, %error, "Error from a released stream ignored");
            return;
        }
        match self.status {
            Status::Tracking(_) => self.status = Status::Error(CheckInError::stream(error)),
            _ => self.stream_warning = Some(error.to_string()),
        }
    }

    fn on_precise(
        &mut self,
        attempt: u64,
        result: Result<PositionFix, PositionError>,
        effects: &mut Vec<Effect>,
    ) {
        let fix = match result {
            Ok(fix) => fix,
            Err(err) => {
                self.status = Status::Error(CheckInError::precise(err));
                return;
            }
        };
        let Some(target) = self.target.as_ref().map(|t| t.location) else {
            self.status = Status::Error(CheckInError::new(
                ErrorKind::LoadFailure,
                "visit target missing",
            ));
            return;
        };

        self.status = Status::Verifying;
        let distance_m = distance_meters(&fix.coordinate, &target);
        if !distance_m.is_nan() {
            self.last_known_distance_m = Some(distance_m);
        }

        if is_within_radius(&fix.coordinate, &target, CHECK_IN_RADIUS_M) {
            self.verified_fix = Some(fix);
            self.release(effects);
            effects.push(Effect::Write { attempt, fix });
        } else {
            self.status = Status::Error(CheckInError::out_of_range(distance_m, self.units));
        }
    }

    fn on_retry(&mut self, effects: &mut Vec<Effect>) {
        let Status::Error(err) = &self.status else {
            debug!(status = %self.status, "Nothing to retry");
            return;
        };

        match (err.recovery(), self.verified_fix, self.target.as_ref()) {
            (Recovery::RetryLoad, _, _) | (_, _, None) => {
                self.release(effects);
                self.status = Status::Loading;
                effects.push(Effect::LoadTarget);
            }
            (Recovery::RetryWrite, Some(fix), Some(_)) => {
                self.attempt += 1;
                self.status = Status::Verifying;
                effects.push(Effect::Write {
                    attempt: self.attempt,
                    fix,
                });
            }
            (Recovery::RetryTracking | Recovery::RetryWrite, _, Some(target)) => {
                let location = target.location;
                self.start_tracking(location, effects);
            }
        }
    }

    fn start_tracking(&mut self, target: Coordinate, effects: &mut Vec<Effect>) {
        self.release(effects);
        self.generation += 1;
        self.subscription = Some(self.generation);
        self.status = Status::Tracking(Proximity::TooFar);
        self.last_known_distance_m = None;
        self.stream_warning = None;
        effects.push(Effect::Subscribe {
            generation: self.generation,
            target,
        });
    }

    fn release(&mut self, effects: &mut Vec<Effect>) {
        if let Some(generation) = self.subscription.take() {
            effects.push(Effect::Release { generation });
        }
    }
}

/// Pure transition function
pub fn transition(mut session: CheckInSession, event: Event) -> (CheckInSession, Vec<Effect>) {
    let effects = session.apply(event);
    (session, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ProximityTracker;
    use proptest::prelude::*;

    const ORIGIN: Coordinate = Coordinate {
        latitude: 0.0,
        longitude: 0.0,
    };

    fn reading(generation: u64, longitude: f64) -> Event {
        let fix = PositionFix::continuous(Coordinate::new(0.0, longitude));
        Event::Reading {
            generation,
            reading: ProximityTracker::new(ORIGIN).read(&fix),
        }
    }

    fn precise(attempt: u64, longitude: f64) -> Event {
        Event::PreciseResult {
            attempt,
            result: Ok(PositionFix::precise(Coordinate::new(0.0, longitude))),
        }
    }

    fn run(session: CheckInSession, events: Vec<Event>) -> (CheckInSession, Vec<Effect>) {
        let mut all = Vec::new();
        let mut session = session;
        for event in events {
            let (next, effects) = transition(session, event);
            session = next;
            all.extend(effects);
        }
        (session, all)
    }

    /// Loaded and tracking with stream generation 1
    fn tracking() -> CheckInSession {
        let (session, effects) = CheckInSession::begin("v1", DistanceUnits::Metric);
        assert_eq!(effects, vec![Effect::LoadTarget]);
        let (session, effects) = transition(
            session,
            Event::TargetLoaded(VisitTarget::scheduled("v1", ORIGIN)),
        );
        assert_eq!(
            effects,
            vec![Effect::Subscribe {
                generation: 1,
                target: ORIGIN
            }]
        );
        session
    }

    fn acquiring() -> CheckInSession {
        run(tracking(), vec![reading(1, 0.00005), Event::AttemptCheckIn]).0
    }

    fn verifying() -> CheckInSession {
        run(acquiring(), vec![precise(1, 0.0)]).0
    }

    fn succeeded() -> CheckInSession {
        run(
            verifying(),
            vec![Event::WriteResult {
                attempt: 1,
                result: Ok(()),
            }],
        )
        .0
    }

    fn count_releases(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Release { .. }))
            .count()
    }

    #[test]
    fn test_locked_predicate() {
        assert!(is_locked(&Status::AcquiringPreciseFix));
        assert!(is_locked(&Status::Verifying));
        assert!(is_locked(&Status::Success));
        assert!(!is_locked(&Status::Loading));
        assert!(!is_locked(&Status::Tracking(Proximity::TooFar)));
        assert!(!is_locked(&Status::Tracking(Proximity::InRange)));
        assert!(!is_locked(&Status::Error(CheckInError::stream(
            PositionError::Timeout
        ))));
    }

    #[test]
    fn test_loaded_session_is_locating() {
        let session = tracking();
        assert_eq!(session.status, Status::Tracking(Proximity::TooFar));
        assert!(session.locating());

        let (session, _) = transition(session, reading(1, 0.0005));
        assert!(!session.locating());
    }

    #[test]
    fn test_scenario_far_fix_blocks_check_in() {
        let (session, effects) = run(tracking(), vec![reading(1, 0.0005), Event::AttemptCheckIn]);

        assert_eq!(session.status, Status::Tracking(Proximity::TooFar));
        assert!((session.last_known_distance_m.unwrap() - 55.6).abs() < 0.5);
        assert!(effects.is_empty());
        assert!(!session.actions().check_in);
        assert!(session.actions().fallback);
    }

    #[test]
    fn test_scenario_near_fix_allows_check_in() {
        let (session, _) = transition(tracking(), reading(1, 0.00005));
        assert_eq!(session.status, Status::Tracking(Proximity::InRange));
        assert!(session.actions().check_in);

        let (session, effects) = transition(session, Event::AttemptCheckIn);
        assert_eq!(session.status, Status::AcquiringPreciseFix);
        assert_eq!(effects, vec![Effect::RequestPreciseFix { attempt: 1 }]);
    }

    #[test]
    fn test_proximity_flips_both_ways() {
        let (session, effects) = run(
            tracking(),
            vec![reading(1, 0.00005), reading(1, 0.0005), reading(1, 0.00001)],
        );
        assert_eq!(session.status, Status::Tracking(Proximity::InRange));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_scenario_precise_fix_out_of_range() {
        let (session, effects) = transition(acquiring(), precise(1, 0.0003));

        let err = session.error().unwrap();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        assert!(err.message.starts_with("too far: "));
        assert_eq!(session.subscription, Some(1));
        assert!(effects.is_empty());

        let (session, effects) = transition(session, Event::Retry);
        assert_eq!(session.status, Status::Tracking(Proximity::TooFar));
        assert_eq!(
            effects,
            vec![
                Effect::Release { generation: 1 },
                Effect::Subscribe {
                    generation: 2,
                    target: ORIGIN
                }
            ]
        );
    }

    #[test]
    fn test_malformed_precise_fix_keeps_last_distance() {
        let before = acquiring().last_known_distance_m;
        assert!(before.is_some_and(|d| d < CHECK_IN_RADIUS_M));

        let (session, effects) = transition(acquiring(), precise(1, f64::NAN));

        let err = session.error().unwrap();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        assert_eq!(err.message, "too far: unknown distance");
        assert_eq!(session.last_known_distance_m, before);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_scenario_verified_fix_writes_and_succeeds() {
        let (session, effects) = transition(acquiring(), precise(1, 0.0));

        assert_eq!(session.status, Status::Verifying);
        assert_eq!(session.subscription, None);
        assert_eq!(effects[0], Effect::Release { generation: 1 });
        assert!(matches!(effects[1], Effect::Write { attempt: 1, .. }));
        assert_eq!(effects.len(), 2);

        let (session, effects) = run(
            session,
            vec![
                Event::WriteResult {
                    attempt: 1,
                    result: Ok(()),
                },
                Event::Exit,
            ],
        );
        assert_eq!(session.status, Status::Success);
        assert_eq!(count_releases(&effects), 0);
    }

    #[test]
    fn test_scenario_write_failure_retries_same_fix() {
        let session = verifying();
        let fix = session.verified_fix.unwrap();

        let (session, _) = transition(
            session,
            Event::WriteResult {
                attempt: 1,
                result: Err(StoreError::Unavailable("503".into())),
            },
        );
        let err = session.error().unwrap();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
        assert_eq!(err.recovery(), Recovery::RetryWrite);

        let (session, effects) = transition(session, Event::Retry);
        assert_eq!(session.status, Status::Verifying);
        assert_eq!(effects, vec![Effect::Write { attempt: 2, fix }]);

        let (session, _) = transition(
            session,
            Event::WriteResult {
                attempt: 2,
                result: Ok(()),
            },
        );
        assert_eq!(session.status, Status::Success);
    }

    #[test]
    fn test_scenario_permission_denied() {
        let (session, effects) = transition(
            tracking(),
            Event::StreamError {
                generation: 1,
                error: PositionError::PermissionDenied,
            },
        );

        assert_eq!(session.error().unwrap().kind, ErrorKind::PermissionDenied);
        assert!(effects.is_empty());
        assert!(session.actions().fallback);

        let (session, effects) = transition(session, Event::Fallback);
        assert_eq!(session.exit, Some(Exit::Fallback));
        assert!(effects.contains(&Effect::OpenFallback));
    }

    #[test]
    fn test_precise_failure_keeps_stream() {
        let (session, effects) = transition(
            acquiring(),
            Event::PreciseResult {
                attempt: 1,
                result: Err(PositionError::Timeout),
            },
        );

        let err = session.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.message, "could not obtain precise location");
        assert_eq!(session.subscription, Some(1));
        assert!(effects.is_empty());

        // distance keeps updating while in error
        let (session, _) = transition(session, reading(1, 0.0005));
        assert!(matches!(session.status, Status::Error(_)));
        assert!(session.last_known_distance_m.unwrap() > 50.0);
    }

    #[test]
    fn test_stream_error_while_locked_is_a_warning() {
        let (session, effects) = transition(
            acquiring(),
            Event::StreamError {
                generation: 1,
                error: PositionError::SensorUnavailable,
            },
        );
        assert_eq!(session.status, Status::AcquiringPreciseFix);
        assert!(session.stream_warning.is_some());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stale_results_ignored() {
        let session = acquiring();
        let (session, effects) = transition(session, precise(7, 0.0));
        assert_eq!(session.status, Status::AcquiringPreciseFix);
        assert!(effects.is_empty());

        let (session, _) = transition(session, reading(9, 0.0005));
        assert!(session.last_known_distance_m.unwrap() < 6.0);

        let session = verifying();
        let (session, _) = transition(
            session,
            Event::WriteResult {
                attempt: 3,
                result: Ok(()),
            },
        );
        assert_eq!(session.status, Status::Verifying);
    }

    #[test]
    fn test_load_failure_retries_load() {
        let (session, _) = CheckInSession::begin("v1", DistanceUnits::Imperial);
        let (session, _) = transition(
            session,
            Event::TargetFailed(StoreError::Unavailable("offline".into())),
        );
        assert_eq!(session.error().unwrap().recovery(), Recovery::RetryLoad);
        assert!(session.actions().fallback);

        let (session, effects) = transition(session, Event::Retry);
        assert_eq!(session.status, Status::Loading);
        assert_eq!(effects, vec![Effect::LoadTarget]);
    }

    #[test]
    fn test_unscheduled_visit_fails_load() {
        let mut target = VisitTarget::scheduled("v1", ORIGIN);
        target.status = carevisit_api_client::VisitStatus::Cancelled;

        let (session, _) = CheckInSession::begin("v1", DistanceUnits::Imperial);
        let (session, effects) = transition(session, Event::TargetLoaded(target));

        assert_eq!(session.error().unwrap().kind, ErrorKind::LoadFailure);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_exit_releases_and_ends_session() {
        let (session, effects) = transition(tracking(), Event::Exit);
        assert_eq!(effects, vec![Effect::Release { generation: 1 }]);
        assert_eq!(session.exit, Some(Exit::Closed));
        assert_eq!(session.actions(), Actions::default());

        let (session, effects) = transition(session, Event::Retry);
        assert!(effects.is_empty());
        assert!(session.is_finished());
    }

    #[test]
    fn test_fallback_not_offered_while_locked() {
        for session in [acquiring(), verifying(), succeeded()] {
            let before = session.status.clone();
            let (session, effects) = transition(session, Event::Fallback);
            assert_eq!(session.status, before);
            assert!(session.exit.is_none());
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_core_error_conversion() {
        let err = CheckInError::out_of_range(33.4, DistanceUnits::Metric);
        let core: carevisit_core::Error = (&err).into();
        assert_eq!(core.code, ErrorCode::OutOfRange);
        assert_eq!(core.message, "too far: 33 m");
        assert!(core.suggestion.is_some());
    }

    fn stream_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (0u64..4, -0.001f64..0.001).prop_map(|(g, lng)| reading(g, lng)),
            (0u64..4, prop_oneof![
                Just(PositionError::PermissionDenied),
                Just(PositionError::SensorUnavailable),
                Just(PositionError::Timeout),
            ])
                .prop_map(|(generation, error)| Event::StreamError { generation, error }),
        ]
    }

    fn any_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            3 => stream_event(),
            1 => Just(Event::TargetLoaded(VisitTarget::scheduled("v1", ORIGIN))),
            1 => Just(Event::TargetFailed(StoreError::Unavailable("offline".into()))),
            2 => Just(Event::AttemptCheckIn),
            1 => (0u64..4, -0.0005f64..0.0005).prop_map(|(a, lng)| precise(a, lng)),
            1 => (0u64..4).prop_map(|attempt| Event::PreciseResult {
                attempt,
                result: Err(PositionError::Timeout)
            }),
            1 => (0u64..4, any::<bool>()).prop_map(|(attempt, ok)| Event::WriteResult {
                attempt,
                result: if ok {
                    Ok(())
                } else {
                    Err(StoreError::Unavailable("503".into()))
                },
            }),
            2 => Just(Event::Retry),
            1 => Just(Event::Fallback),
            1 => Just(Event::Exit),
        ]
    }

    proptest! {
        #[test]
        fn prop_stream_never_leaves_locked_states(
            start in 0usize..3,
            events in prop::collection::vec(stream_event(), 0..40),
        ) {
            let mut session = [acquiring(), verifying(), succeeded()][start].clone();
            let locked = session.status.clone();
            prop_assert!(is_locked(&locked));

            for event in events {
                let effects = session.apply(event);
                prop_assert_eq!(&session.status, &locked);
                prop_assert!(effects.is_empty());
            }
        }

        #[test]
        fn prop_resource_invariants_hold(events in prop::collection::vec(any_event(), 0..60)) {
            let (mut session, _) = CheckInSession::begin("v1", DistanceUnits::Imperial);
            let mut active = 0i32;
            let mut successes = 0;

            for event in events {
                let was_success = session.status == Status::Success;
                let before = session.status.clone();
                let stream = event.is_stream();
                let effects = session.apply(event);

                for effect in &effects {
                    match effect {
                        Effect::Subscribe { .. } => active += 1,
                        Effect::Release { .. } => active -= 1,
                        Effect::Write { .. } => prop_assert!(!was_success),
                        _ => {}
                    }
                }
                prop_assert!((0..=1).contains(&active));
                prop_assert_eq!(session.subscription.is_some(), active == 1);

                if stream && is_locked(&before) {
                    prop_assert_eq!(&session.status, &before);
                }
                if session.status == Status::Success && !was_success {
                    successes += 1;
                }
            }
            prop_assert!(successes <= 1);
        }
    }
}
