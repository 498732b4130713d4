//! Position traces replayed by `simulate`
//!
//! ```toml
//! visit_id = "demo"
//! recipient_name = "Ada Lovelace"
//! target = { latitude = 0.0, longitude = 0.0 }
//!
//! [[steps]]
//! step = "fix"
//! latitude = 0.0
//! longitude = 0.00005
//!
//! [[steps]]
//! step = "precise"
//! latitude = 0.0
//! longitude = 0.0
//!
//! [[steps]]
//! step = "check_in"
//! ```

use anyhow::{Context, Result};
use carevisit_checkin::{Permission, PositionError, VisitTarget};
use carevisit_geo::Coordinate;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// A scripted check-in
#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    #[serde(default = "default_visit_id")]
    pub visit_id: String,
    pub target: Coordinate,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_visit_id() -> String {
    "demo".to_string()
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid trace {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The visit the in-memory store starts with
    pub fn visit_target(&self) -> VisitTarget {
        let mut target = VisitTarget::scheduled(self.visit_id.clone(), self.target);
        target.recipient_name = self.recipient_name.clone().unwrap_or_default();
        target
    }
}

/// One thing that happens during a replay
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Continuous fix on the stream
    Fix { latitude: f64, longitude: f64 },
    /// The stream fails and stops
    StreamError { error: PositionError },
    /// Answer for the next precise request
    Precise { latitude: f64, longitude: f64 },
    PreciseError { error: PositionError },
    /// The next precise request never answers
    PreciseHang,
    /// The next write is rejected
    FailWrite { message: String },
    /// A dispatcher cancels the visit
    CancelVisit,
    CheckIn,
    Retry,
    Fallback,
    Exit,
    Wait { ms: u64 },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fix { latitude, longitude } => write!(f, "fix ({latitude}, {longitude})"),
            Self::StreamError { error } => write!(f, "stream error: {error}"),
            Self::Precise { latitude, longitude } => {
                write!(f, "precise ({latitude}, {longitude})")
            }
            Self::PreciseError { error } => write!(f, "precise error: {error}"),
            Self::PreciseHang => write!(f, "precise hangs"),
            Self::FailWrite { message } => write!(f, "write fails: {message}"),
            Self::CancelVisit => write!(f, "visit cancelled"),
            Self::CheckIn => write!(f, "tap check in"),
            Self::Retry => write!(f, "tap retry"),
            Self::Fallback => write!(f, "tap fallback"),
            Self::Exit => write!(f, "leave screen"),
            Self::Wait { ms } => write!(f, "wait {ms} ms"),
        }
    }
}
