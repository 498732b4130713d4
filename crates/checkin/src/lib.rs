//! Proximity-gated visit check-in
//!
//! A field worker may start a care visit only when their position is within
//! [`CHECK_IN_RADIUS_M`](carevisit_geo::CHECK_IN_RADIUS_M) of the care
//! recipient's address:
//!
//! - [`source`]: continuous and one-shot positions, as values
//! - [`tracker`]: live `too_far` / `in_range` classification of the stream
//! - [`machine`]: the pure check-in state machine
//! - [`store`]: the visit read and the single start-visit write
//! - [`controller`]: runs a session on tokio and publishes snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use carevisit_checkin::prelude::*;
//! use carevisit_core::config::CheckInConfig;
//! use carevisit_geo::Coordinate;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let source = ManualSource::new();
//! let store = Arc::new(
//!     InMemoryVisitStore::new().with_visit(VisitTarget::scheduled("v1", Coordinate::new(0.0, 0.0))),
//! );
//! let (controller, handle) =
//!     CheckInController::new("v1", Arc::new(source.clone()), store, &CheckInConfig::default());
//! let session = tokio::spawn(controller.run());
//!
//! source.emit_fix(Coordinate::new(0.0, 0.00005));
//! handle.wait_for(|s| s.actions.check_in).await;
//! handle.attempt_check_in();
//! let outcome = session.await;
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod controller;
pub mod fix;
pub mod machine;
pub mod source;
pub mod store;
pub mod tracker;

pub use controller::{Action, CheckInController, CheckInHandle, SessionOutcome, Snapshot};
pub use fix::{AccuracyClass, PositionFix};
pub use machine::{
    is_locked, transition, Actions, CheckInError, CheckInSession, Effect, ErrorKind, Event, Exit,
    Recovery, Status,
};
pub use source::{
    with_precise_timeout, ManualSource, Permission, PositionError, PositionSource, PreciseOutcome,
    Subscription, TimeoutSource, WatchCallback, WatchEvent,
};
pub use store::{InMemoryVisitStore, RemoteVisitStore, StoreError, VisitStore, VisitTarget};
pub use tracker::{Proximity, ProximityReading, ProximityTracker, TrackerEvent};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::controller::{CheckInController, CheckInHandle, SessionOutcome, Snapshot};
    pub use crate::machine::{ErrorKind, Status};
    pub use crate::source::{ManualSource, PositionSource, PreciseOutcome};
    pub use crate::store::{InMemoryVisitStore, RemoteVisitStore, VisitStore, VisitTarget};
    pub use crate::tracker::Proximity;
}
