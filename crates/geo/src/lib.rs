//! Geodesy for visit check-in.
//!
//! This crate provides:
//! - Haversine distance between two coordinates, in meters
//! - The check-in radius and the inclusive containment test built on it
//! - Human-readable distance formatting (display only, never used for gating)
//! - PostGIS POINT parsing (GeoJSON and WKT) for target locations read from the backend
//!
//! # Example
//!
//! ```
//! use carevisit_geo::{distance_meters, is_within_radius, Coordinate, CHECK_IN_RADIUS_M};
//!
//! let target = Coordinate::new(0.0, 0.0);
//! let worker = Coordinate::new(0.0, 0.00005); // ~5.5 m east
//!
//! assert!(distance_meters(&worker, &target) < 6.0);
//! assert!(is_within_radius(&worker, &target, CHECK_IN_RADIUS_M));
//! ```

mod error;
mod format;
mod haversine;
mod postgis;

pub use error::{GeoError, Result};
pub use format::{format_distance, format_distance_in, DistanceUnits};
pub use haversine::{distance_meters, is_within_radius, EARTH_RADIUS_M};
pub use postgis::{parse_postgis_point, PostGISPoint};

/// Distance in meters at or below which a worker is considered at the visit address.
///
/// One global threshold, shared by the continuous stream and the precise
/// verification fix. Not configurable per visit.
pub const CHECK_IN_RADIUS_M: f64 = 30.0;

/// A geographic coordinate with latitude and longitude.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a new coordinate.
    ///
    /// Values are not validated; sensor and backend readings are trusted as-is.
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Returns true if both components are finite and inside their ranges.
    #[inline]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    #[inline]
    pub(crate) fn to_radians(self) -> (f64, f64) {
        (self.latitude.to_radians(), self.longitude.to_radians())
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self::new(lat, lng)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_creation() {
        let coord = Coordinate::new(40.7128, -74.0060);
        assert_eq!(coord.latitude, 40.7128);
        assert_eq!(coord.longitude, -74.0060);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(0.0, 0.0).is_valid());
        assert!(Coordinate::new(90.0, 180.0).is_valid());
        assert!(Coordinate::new(-90.0, -180.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_coordinate_from_tuple() {
        let coord: Coordinate = (40.7128, -74.0060).into();
        assert_eq!(coord.longitude, -74.0060);
    }

    #[test]
    fn test_coordinate_display() {
        assert_eq!(Coordinate::new(1.5, -2.25).to_string(), "(1.500000, -2.250000)");
    }
}
