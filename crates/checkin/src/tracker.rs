//! Live proximity to the visit address
//!
//! The tracker wraps one stream subscription, classifies each fix against the
//! target and republishes the classification with the raw distance. It keeps
//! no state of its own.

use crate::fix::PositionFix;
use crate::source::{PositionError, PositionSource, Subscription, WatchEvent};
use carevisit_geo::{distance_meters, is_within_radius, Coordinate, CHECK_IN_RADIUS_M};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the worker is close enough to check in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    TooFar,
    InRange,
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFar => write!(f, "too_far"),
            Self::InRange => write!(f, "in_range"),
        }
    }
}

/// One classified fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityReading {
    pub proximity: Proximity,
    /// Meters to the target; NaN for malformed input
    pub distance_m: f64,
    pub fix: PositionFix,
}

/// What the tracker publishes
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Reading(ProximityReading),
    /// Passed through from the source unchanged
    Error(PositionError),
}

/// Classifies fixes against one stationary target
#[derive(Debug, Clone, Copy)]
pub struct ProximityTracker {
    target: Coordinate,
    radius_m: f64,
}

impl ProximityTracker {
    /// Track against `target` using the check-in radius
    pub fn new(target: Coordinate) -> Self {
        Self {
            target,
            radius_m: CHECK_IN_RADIUS_M,
        }
    }

    pub fn target(&self) -> Coordinate {
        self.target
    }

    /// Classify a single fix
    pub fn read(&self, fix: &PositionFix) -> ProximityReading {
        let distance_m = distance_meters(&fix.coordinate, &self.target);
        let proximity = if is_within_radius(&fix.coordinate, &self.target, self.radius_m) {
            Proximity::InRange
        } else {
            Proximity::TooFar
        };
        ProximityReading {
            proximity,
            distance_m,
            fix: *fix,
        }
    }

    /// Subscribe to `source` and publish a classification per fix
    pub fn start<S, F>(&self, source: &S, mut publish: F) -> Subscription
    where
        S: PositionSource,
        F: FnMut(TrackerEvent) + Send + 'static,
    {
        let tracker = *self;
        source.watch(Box::new(move |event| match event {
            WatchEvent::Fix(fix) => publish(TrackerEvent::Reading(tracker.read(&fix))),
            WatchEvent::Error(error) => publish(TrackerEvent::Error(error)),
        }))
    }
}
