//! Position fixes

use carevisit_geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a fix was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyClass {
    /// Best-effort reading from the recurring stream
    Continuous,
    /// One-shot, high-effort reading used to verify a check-in
    Precise,
}

/// A single position reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    pub accuracy: AccuracyClass,
}

impl PositionFix {
    /// A stream reading taken now
    pub fn continuous(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            timestamp: Utc::now(),
            accuracy: AccuracyClass::Continuous,
        }
    }

    /// A verification reading taken now
    pub fn precise(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            timestamp: Utc::now(),
            accuracy: AccuracyClass::Precise,
        }
    }
}
