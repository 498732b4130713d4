//! Drives one check-in session
//!
//! The controller owns the session, the stream subscription and the channels
//! to the screen. User actions and effect results arrive as events on one
//! task, so transitions never race each other; the precise request, the
//! visit read and the write run as spawned tasks that report back.

use crate::fix::PositionFix;
use crate::machine::{Actions, CheckInSession, Effect, ErrorKind, Event, Exit, Status};
use crate::source::{with_precise_timeout, PositionSource, Subscription};
use crate::store::VisitStore;
use crate::tracker::{ProximityTracker, TrackerEvent};
use carevisit_core::config::CheckInConfig;
use carevisit_geo::{format_distance_in, Coordinate};
use carevisit_telemetry::{metrics, names, Timer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What the screen can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AttemptCheckIn,
    Retry,
    Fallback,
    Exit,
}

impl From<Action> for Event {
    fn from(action: Action) -> Self {
        match action {
            Action::AttemptCheckIn => Event::AttemptCheckIn,
            Action::Retry => Event::Retry,
            Action::Fallback => Event::Fallback,
            Action::Exit => Event::Exit,
        }
    }
}

/// Everything the screen renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub visit_id: String,
    pub status: Status,
    pub last_known_distance_m: Option<f64>,
    pub distance_label: Option<String>,
    pub error_message: Option<String>,
    pub warning: Option<String>,
    /// Tracking, but no fix yet
    pub locating: bool,
    pub actions: Actions,
    pub recipient_name: Option<String>,
}

impl Snapshot {
    pub fn of(session: &CheckInSession) -> Self {
        Self {
            visit_id: session.visit_id.clone(),
            status: session.status.clone(),
            last_known_distance_m: session.last_known_distance_m,
            distance_label: session
                .last_known_distance_m
                .map(|d| format_distance_in(d, session.units)),
            error_message: session.error().map(|e| e.message.clone()),
            warning: session.stream_warning.clone(),
            locating: session.locating(),
            actions: session.actions(),
            recipient_name: session
                .target
                .as_ref()
                .map(|t| t.recipient_name.clone())
                .filter(|name| !name.is_empty()),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The visit was started with this fix
    CheckedIn(PositionFix),
    /// The worker chose the alternate check-in
    Fallback,
    /// The screen closed first
    Exited,
}

/// The screen's side of a running session
#[derive(Clone)]
pub struct CheckInHandle {
    actions: mpsc::UnboundedSender<Action>,
    snapshots: watch::Receiver<Snapshot>,
}

impl CheckInHandle {
    /// Ask for a precise fix; ignored unless in range
    pub fn attempt_check_in(&self) -> bool {
        self.send(Action::AttemptCheckIn)
    }

    /// Recover from an error
    pub fn retry(&self) -> bool {
        self.send(Action::Retry)
    }

    /// Leave for the alternate check-in
    pub fn go_to_fallback(&self) -> bool {
        self.send(Action::Fallback)
    }

    /// Close the screen
    pub fn exit(&self) -> bool {
        self.send(Action::Exit)
    }

    /// Returns false once the session has ended
    pub fn send(&self, action: Action) -> bool {
        self.actions.send(action).is_ok()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `predicate`; `None` if the session
    /// ended first
    pub async fn wait_for(&self, predicate: impl FnMut(&Snapshot) -> bool) -> Option<Snapshot> {
        let mut rx = self.snapshots.clone();
        let result = rx.wait_for(predicate).await;
        result.ok().map(|s| s.clone())
    }
}

/// Runs a [`CheckInSession`] against a position source and a visit store
pub struct CheckInController<S, V> {
    session: CheckInSession,
    source: Arc<S>,
    store: Arc<V>,
    precise_timeout: Duration,
    /// Active stream, keyed by session generation
    stream: Option<(u64, Subscription)>,
    pending: Vec<Effect>,
    precise_timer: Option<Timer>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    actions_rx: mpsc::UnboundedReceiver<Action>,
    snapshots: watch::Sender<Snapshot>,
}

impl<S: PositionSource, V: VisitStore> CheckInController<S, V> {
    pub fn new(
        visit_id: impl Into<String>,
        source: Arc<S>,
        store: Arc<V>,
        config: &CheckInConfig,
    ) -> (Self, CheckInHandle) {
        let (session, pending) = CheckInSession::begin(visit_id, config.units);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(Snapshot::of(&session));

        let controller = Self {
            session,
            source,
            store,
            precise_timeout: config.precise_fix_timeout(),
            stream: None,
            pending,
            precise_timer: None,
            events_tx,
            events_rx,
            actions_rx,
            snapshots,
        };
        let handle = CheckInHandle {
            actions: actions_tx,
            snapshots: snapshot_rx,
        };
        (controller, handle)
    }

    pub fn session(&self) -> &CheckInSession {
        &self.session
    }

    /// Run until the visit is started, the fallback is taken or the screen
    /// exits. Dropping every handle counts as an exit.
    pub async fn run(mut self) -> SessionOutcome {
        info!(visit_id = %self.session.visit_id, "Check-in session started");
        let effects = std::mem::take(&mut self.pending);
        self.perform(effects);
        self.publish();

        while !self.session.is_finished() {
            let event = tokio::select! {
                Some(event) = self.events_rx.recv() => event,
                action = self.actions_rx.recv() => action.map_or(Event::Exit, Event::from),
            };
            self.handle(event);
        }

        if let Some((_, mut stream)) = self.stream.take() {
            stream.release();
        }
        let outcome = self.outcome();
        info!(visit_id = %self.session.visit_id, ?outcome, "Check-in session ended");
        outcome
    }

    fn handle(&mut self, event: Event) {
        let before = self.session.status.clone();
        let had_warning = self.session.stream_warning.is_some();

        let effects = self.session.apply(event);

        if self.session.status != before {
            info!(
                visit_id = %self.session.visit_id,
                from = %before,
                to = %self.session.status,
                "Check-in status changed"
            );
        }
        self.record_metrics(&before, had_warning, &effects);
        self.perform(effects);
        self.publish();
    }

    fn record_metrics(&mut self, before: &Status, had_warning: bool, effects: &[Effect]) {
        let registry = metrics();
        let after = &self.session.status;

        if *before == Status::AcquiringPreciseFix && *after != Status::AcquiringPreciseFix {
            if let Some(timer) = self.precise_timer.take() {
                timer.stop();
            }
        }
        if let Some(distance) = precise_distance_sample(before, &self.session) {
            registry.histogram(names::PRECISE_DISTANCE_M, distance);
        }

        if after != before {
            match after {
                Status::Success => registry.increment(names::SUCCESS),
                Status::Error(err) => match err.kind {
                    ErrorKind::OutOfRange => registry.increment(names::OUT_OF_RANGE),
                    ErrorKind::PersistenceFailure => registry.increment(names::WRITE_FAILED),
                    ErrorKind::LoadFailure => registry.increment(names::LOAD_FAILED),
                    _ if *before == Status::AcquiringPreciseFix => {
                        registry.increment(names::PRECISE_FAILED);
                    }
                    _ => registry.increment(names::STREAM_ERRORS),
                },
                _ => {}
            }
        }

        if !had_warning && self.session.stream_warning.is_some() {
            registry.increment(names::STREAM_ERRORS);
        }

        for effect in effects {
            match effect {
                Effect::RequestPreciseFix { .. } => {
                    registry.increment(names::ATTEMPTS);
                    self.precise_timer = Some(Timer::start(names::PRECISE_FIX_MS));
                }
                Effect::OpenFallback => registry.increment(names::FALLBACK),
                _ => {}
            }
        }
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::LoadTarget => self.spawn_load(),
                Effect::Subscribe { generation, target } => self.subscribe(generation, target),
                Effect::Release { generation } => self.release(generation),
                Effect::RequestPreciseFix { attempt } => self.spawn_precise(attempt),
                Effect::Write { attempt, fix } => self.spawn_write(attempt, fix),
                Effect::OpenFallback => {
                    info!(visit_id = %self.session.visit_id, "Handing over to alternate check-in");
                }
            }
        }
    }

    fn subscribe(&mut self, generation: u64, target: Coordinate) {
        let tx = self.events_tx.clone();
        let tracker = ProximityTracker::new(target);
        let subscription = tracker.start(&*self.source, move |event| {
            let event = match event {
                TrackerEvent::Reading(reading) => Event::Reading { generation, reading },
                TrackerEvent::Error(error) => Event::StreamError { generation, error },
            };
            // Fails only after the session ended
            let _ = tx.send(event);
        });
        debug!(generation, subscription = subscription.id(), "Watching position");

        if let Some((stale, mut old)) = self.stream.replace((generation, subscription)) {
            warn!(stale, "Replacing a stream that was never released");
            old.release();
        }
    }

    fn release(&mut self, generation: u64) {
        match self.stream.take() {
            Some((current, mut stream)) if current == generation => stream.release(),
            other => self.stream = other,
        }
    }

    fn spawn_load(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let visit_id = self.session.visit_id.clone();
        tokio::spawn(async move {
            let event = match store.load(&visit_id).await {
                Ok(target) => Event::TargetLoaded(target),
                Err(err) => {
                    warn!(%visit_id, error = %err, "Visit load failed");
                    Event::TargetFailed(err)
                }
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_precise(&self, attempt: u64) {
        let source = Arc::clone(&self.source);
        let timeout = self.precise_timeout;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let bounded = with_precise_timeout(source, timeout);
            let result = bounded.precise_fix().await;
            let _ = tx.send(Event::PreciseResult { attempt, result });
        });
    }

    fn spawn_write(&self, attempt: u64, fix: PositionFix) {
        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let visit_id = self.session.visit_id.clone();
        info!(%visit_id, attempt, at = %fix.coordinate, "Recording check-in");
        tokio::spawn(async move {
            let result = store.start_visit(&visit_id, &fix).await;
            if let Err(err) = &result {
                warn!(%visit_id, attempt, error = %err, "Check-in write failed");
            }
            let _ = tx.send(Event::WriteResult { attempt, result });
        });
    }

    fn publish(&self) {
        let next = Snapshot::of(&self.session);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn outcome(&self) -> SessionOutcome {
        match (&self.session.status, self.session.exit, self.session.verified_fix) {
            (Status::Success, _, Some(fix)) => SessionOutcome::CheckedIn(fix),
            (_, Some(Exit::Fallback), _) => SessionOutcome::Fallback,
            _ => SessionOutcome::Exited,
        }
    }
}

/// Distance measured by a precise fix that was just classified
///
/// Timeouts and failed requests leave only the coarse stream distance behind,
/// so they yield nothing.
fn precise_distance_sample(before: &Status, session: &CheckInSession) -> Option<f64> {
    if *before != Status::AcquiringPreciseFix {
        return None;
    }
    match &session.status {
        Status::Verifying => session.last_known_distance_m,
        Status::Error(err) if err.kind == ErrorKind::OutOfRange => session.last_known_distance_m,
        _ => None,
    }
}
