//! Visit persistence
//!
//! The check-in reads one visit when the screen opens and writes it at most
//! once, when a precise fix has verified presence.

use crate::fix::PositionFix;
use carevisit_api_client::{ApiError, CareVisitClient, StartVisit, VisitRow, VisitStatus};
use carevisit_geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::{self, Future};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// Everything the check-in screen needs about one visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitTarget {
    pub visit_id: String,
    /// The care recipient's address
    pub location: Coordinate,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub recipient_name: String,
    pub address_line: Option<String>,
    pub status: VisitStatus,
}

impl VisitTarget {
    /// A scheduled visit at `location`
    pub fn scheduled(visit_id: impl Into<String>, location: Coordinate) -> Self {
        Self {
            visit_id: visit_id.into(),
            location,
            scheduled_start: None,
            scheduled_end: None,
            recipient_name: String::new(),
            address_line: None,
            status: VisitStatus::Scheduled,
        }
    }

    /// Only a scheduled visit can be checked into
    pub fn ensure_scheduled(&self) -> Result<(), StoreError> {
        if self.status == VisitStatus::Scheduled {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "visit {} is {:?}, not scheduled",
                self.visit_id, self.status
            )))
        }
    }
}

impl TryFrom<VisitRow> for VisitTarget {
    type Error = StoreError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        let location = row.target_location().map_err(StoreError::from)?;
        let (recipient_name, address_line) = row
            .recipient
            .map(|r| (r.full_name, r.address_line))
            .unwrap_or_default();
        Ok(Self {
            visit_id: row.id,
            location,
            scheduled_start: row.scheduled_start,
            scheduled_end: row.scheduled_end,
            recipient_name,
            address_line,
            status: row.status,
        })
    }
}

/// Persistence failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("visit not found: {0}")]
    NotFound(String),

    /// Someone else changed the visit
    #[error("visit changed concurrently: {0}")]
    Conflict(String),

    #[error("invalid visit location: {0}")]
    InvalidLocation(String),

    #[error("visit service unavailable: {0}")]
    Unavailable(String),
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(id) => Self::NotFound(id),
            ref e if e.is_conflict() => Self::Conflict(e.to_string()),
            ApiError::InvalidLocation(e) => Self::InvalidLocation(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for carevisit_core::Error {
    fn from(err: StoreError) -> Self {
        use carevisit_core::ErrorCode;
        let code = match &err {
            StoreError::NotFound(_) => ErrorCode::VisitNotFound,
            StoreError::Conflict(_) => ErrorCode::VisitConflict,
            StoreError::InvalidLocation(_) => ErrorCode::InvalidTargetLocation,
            StoreError::Unavailable(_) => ErrorCode::VisitLoadFailed,
        };
        Self::new(code, err.to_string()).with_source(err)
    }
}

/// Reads and starts visits
pub trait VisitStore: Send + Sync + 'static {
    /// Read the visit's target and display fields
    fn load(&self, visit_id: &str) -> impl Future<Output = Result<VisitTarget, StoreError>> + Send;

    /// Single atomic update: status `in_progress`, start time and coordinates of `fix`
    fn start_visit(
        &self,
        visit_id: &str,
        fix: &PositionFix,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ============================================================================
// Supabase
// ============================================================================

/// [`VisitStore`] backed by the Supabase `visits` table
#[derive(Clone)]
pub struct RemoteVisitStore {
    client: CareVisitClient,
}

impl RemoteVisitStore {
    pub fn new(client: CareVisitClient) -> Self {
        Self { client }
    }
}

impl VisitStore for RemoteVisitStore {
    fn load(&self, visit_id: &str) -> impl Future<Output = Result<VisitTarget, StoreError>> + Send {
        let visits = self.client.visits();
        let visit_id = visit_id.to_string();
        async move {
            let row = visits.get(&visit_id).await?;
            VisitTarget::try_from(row)
        }
    }

    fn start_visit(
        &self,
        visit_id: &str,
        fix: &PositionFix,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let visits = self.client.visits();
        let visit_id = visit_id.to_string();
        let update = StartVisit::new(fix.coordinate, fix.timestamp);
        async move {
            visits.start(&visit_id, &update).await?;
            Ok(())
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// A visit as held by [`InMemoryVisitStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVisit {
    pub target: VisitTarget,
    pub actual_start: Option<DateTime<Utc>>,
    pub check_in: Option<Coordinate>,
}

#[derive(Default)]
struct MemoryState {
    visits: HashMap<String, StoredVisit>,
    load_failures: Vec<String>,
    write_failures: Vec<String>,
    writes: usize,
}

/// [`VisitStore`] kept in process memory, with scriptable failures
///
/// Writes behave like the conditional backend update: only a `scheduled`
/// visit can be started.
#[derive(Default)]
pub struct InMemoryVisitStore {
    state: Mutex<MemoryState>,
}

impl InMemoryVisitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a visit
    pub fn insert(&self, target: VisitTarget) {
        self.lock().visits.insert(
            target.visit_id.clone(),
            StoredVisit {
                target,
                actual_start: None,
                check_in: None,
            },
        );
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with_visit(self, target: VisitTarget) -> Self {
        self.insert(target);
        self
    }

    /// Simulate a dispatcher changing the visit
    pub fn set_status(&self, visit_id: &str, status: VisitStatus) {
        if let Some(visit) = self.lock().visits.get_mut(visit_id) {
            visit.target.status = status;
        }
    }

    /// Make the next load fail with `message`
    pub fn fail_next_load(&self, message: impl Into<String>) {
        self.lock().load_failures.push(message.into());
    }

    /// Make the next write fail with `message`
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.lock().write_failures.push(message.into());
    }

    pub fn get(&self, visit_id: &str) -> Option<StoredVisit> {
        self.lock().visits.get(visit_id).cloned()
    }

    /// Write attempts received, failed ones included
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn load_now(&self, visit_id: &str) -> Result<VisitTarget, StoreError> {
        let mut state = self.lock();
        if !state.load_failures.is_empty() {
            return Err(StoreError::Unavailable(state.load_failures.remove(0)));
        }
        state
            .visits
            .get(visit_id)
            .map(|v| v.target.clone())
            .ok_or_else(|| StoreError::NotFound(visit_id.to_string()))
    }

    fn start_now(&self, visit_id: &str, fix: &PositionFix) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.writes += 1;
        if !state.write_failures.is_empty() {
            let message = state.write_failures.remove(0);
            warn!(visit_id, %message, "Scripted write failure");
            return Err(StoreError::Unavailable(message));
        }

        let visit = state
            .visits
            .get_mut(visit_id)
            .ok_or_else(|| StoreError::NotFound(visit_id.to_string()))?;
        visit.target.ensure_scheduled()?;

        visit.target.status = VisitStatus::InProgress;
        visit.actual_start = Some(fix.timestamp);
        visit.check_in = Some(fix.coordinate);
        info!(visit_id, at = %fix.coordinate, "Visit started");
        Ok(())
    }
}

impl VisitStore for InMemoryVisitStore {
    fn load(&self, visit_id: &str) -> impl Future<Output = Result<VisitTarget, StoreError>> + Send {
        future::ready(self.load_now(visit_id))
    }

    fn start_visit(
        &self,
        visit_id: &str,
        fix: &PositionFix,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        future::ready(self.start_now(visit_id, fix))
    }
}
