//! Visit endpoints
//!
//! Maps to the `visits` table through PostgREST:
//! - Read one visit with its care recipient's display fields and address location
//! - Start a visit: the single conditional update a verified check-in performs

use crate::client::CareVisitClient;
use crate::error::{ApiError, ApiResult};
use carevisit_geo::{parse_postgis_point, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Columns fetched for a check-in, with the recipient embedded
const VISIT_SELECT: &str = "id,status,scheduled_start,scheduled_end,actual_start,check_in_latitude,check_in_longitude,recipient:elders(full_name,address_line,location)";

/// Visits API interface
#[derive(Clone)]
pub struct VisitsApi {
    client: CareVisitClient,
}

impl VisitsApi {
    /// Create a new visits API interface
    pub(crate) fn new(client: CareVisitClient) -> Self {
        Self { client }
    }

    /// Fetch a visit by id
    ///
    /// GET /rest/v1/visits?id=eq.<id>&select=...
    pub async fn get(&self, visit_id: &str) -> ApiResult<VisitRow> {
        let path = format!("visits?id=eq.{}&select={VISIT_SELECT}", encode(visit_id));
        let rows: Vec<VisitRow> = self.client.get(&path).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(visit_id.to_string()))
    }

    /// Mark a scheduled visit as started
    ///
    /// PATCH /rest/v1/visits?id=eq.<id>&status=eq.scheduled
    ///
    /// The status filter makes the update conditional: if a dispatcher
    /// cancelled or reassigned the visit meanwhile, no row matches and the
    /// call fails with [`ApiError::Conflict`].
    pub async fn start(&self, visit_id: &str, update: &StartVisit) -> ApiResult<VisitRow> {
        let path = format!(
            "visits?id=eq.{}&status=eq.scheduled&select={VISIT_SELECT}",
            encode(visit_id)
        );
        let rows: Vec<VisitRow> = self.client.patch(&path, update).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Conflict(visit_id.to_string()))?;

        info!(visit_id, status = ?row.status, "Visit started");
        Ok(row)
    }
}

/// Percent-encode the characters PostgREST filter values cannot carry raw
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Lifecycle status of a visit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    /// Booked, not yet started
    Scheduled,
    /// Worker checked in
    InProgress,
    /// Worker checked out
    Completed,
    /// Cancelled by a dispatcher or the family
    Cancelled,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

/// A row of the `visits` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRow {
    /// Visit id
    pub id: String,
    /// Current status
    pub status: VisitStatus,
    /// Start of the booked window
    pub scheduled_start: Option<DateTime<Utc>>,
    /// End of the booked window
    pub scheduled_end: Option<DateTime<Utc>>,
    /// When the worker checked in
    pub actual_start: Option<DateTime<Utc>>,
    /// Latitude of the verifying fix
    pub check_in_latitude: Option<f64>,
    /// Longitude of the verifying fix
    pub check_in_longitude: Option<f64>,
    /// Embedded care recipient
    pub recipient: Option<RecipientRow>,
}

/// Display fields and address location of the care recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRow {
    /// Name shown on the check-in screen
    pub full_name: String,
    /// Street address shown on the check-in screen
    pub address_line: Option<String>,
    /// PostGIS point of the address
    #[serde(default)]
    pub location: serde_json::Value,
}

impl VisitRow {
    /// The stationary coordinate the worker must reach
    pub fn target_location(&self) -> ApiResult<Coordinate> {
        let recipient = self
            .recipient
            .as_ref()
            .ok_or(ApiError::InvalidLocation(carevisit_geo::GeoError::MissingLocation))?;
        Ok(parse_postgis_point(&recipient.location)?)
    }
}

/// Body of the check-in update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartVisit {
    /// Always `in_progress`
    pub status: VisitStatus,
    /// Timestamp of the verifying fix
    pub actual_start: DateTime<Utc>,
    /// Verified latitude
    pub check_in_latitude: f64,
    /// Verified longitude
    pub check_in_longitude: f64,
}

impl StartVisit {
    /// Build the update from a verified coordinate and start time
    pub fn new(at: Coordinate, actual_start: DateTime<Utc>) -> Self {
        Self {
            status: VisitStatus::InProgress,
            actual_start,
            check_in_latitude: at.latitude,
            check_in_longitude: at.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> serde_json::Value {
        json!({
            "id": "3f1c",
            "status": "scheduled",
            "scheduled_start": "2026-03-01T14:00:00Z",
            "scheduled_end": "2026-03-01T16:00:00Z",
            "actual_start": null,
            "check_in_latitude": null,
            "check_in_longitude": null,
            "recipient": {
                "full_name": "Ada Lovelace",
                "address_line": "12 Elm St",
                "location": {"type": "Point", "coordinates": [-71.06, 42.36]}
            }
        })
    }

    #[test]
    fn test_visit_row_deserializes() {
        let row: VisitRow = serde_json::from_value(sample_row()).unwrap();
        assert_eq!(row.status, VisitStatus::Scheduled);
        assert_eq!(row.recipient.as_ref().unwrap().full_name, "Ada Lovelace");
        assert_eq!(row.target_location().unwrap(), Coordinate::new(42.36, -71.06));
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let mut value = sample_row();
        value["status"] = json!("no_show");
        let row: VisitRow = serde_json::from_value(value).unwrap();
        assert_eq!(row.status, VisitStatus::Unknown);
    }

    #[test]
    fn test_missing_location_is_invalid() {
        let mut value = sample_row();
        value["recipient"]["location"] = json!(null);
        let row: VisitRow = serde_json::from_value(value).unwrap();
        assert!(matches!(
            row.target_location(),
            Err(ApiError::InvalidLocation(_))
        ));

        let mut value = sample_row();
        value["recipient"] = json!(null);
        let row: VisitRow = serde_json::from_value(value).unwrap();
        assert!(row.target_location().is_err());
    }

    #[test]
    fn test_start_visit_body() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T14:03:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = serde_json::to_value(StartVisit::new(Coordinate::new(42.36, -71.06), at)).unwrap();

        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["check_in_latitude"], 42.36);
        assert_eq!(body["check_in_longitude"], -71.06);
        assert_eq!(body["actual_start"], "2026-03-01T14:03:00Z");
    }

    #[test]
    fn test_encode_filter_value() {
        assert_eq!(encode("abc-123"), "abc-123");
        assert_eq!(encode("a,b&c"), "a%2Cb%26c");
    }
}
