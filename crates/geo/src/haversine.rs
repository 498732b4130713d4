//! Haversine distance and radius gating.
//!
//! The Haversine formula calculates the great-circle distance between two points
//! on a sphere given their longitudes and latitudes. Malformed input (NaN or
//! infinite components) yields NaN, and a NaN distance is never within any radius.

use crate::Coordinate;

/// Earth's mean radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculates the great-circle distance between two coordinates in meters.
///
/// # Example
/// ```
/// use carevisit_geo::{distance_meters, Coordinate};
///
/// let origin = Coordinate::new(0.0, 0.0);
/// let east = Coordinate::new(0.0, 0.0005);
///
/// let d = distance_meters(&origin, &east);
/// assert!((d - 55.6).abs() < 0.5);
/// ```
#[inline]
pub fn distance_meters(from: &Coordinate, to: &Coordinate) -> f64 {
    let (lat1, lon1) = from.to_radians();
    let (lat2, lon2) = to.to_radians();

    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    // NaN must survive; `f64::min` would turn it into 1.0.
    if a.is_nan() {
        return f64::NAN;
    }
    // Rounding can push `a` a hair past 1.0 for antipodal points.
    let a = a.min(1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Returns true when `current` is within `radius_m` meters of `target`.
///
/// The boundary is inclusive. A NaN distance is never within the radius.
#[inline]
pub fn is_within_radius(current: &Coordinate, target: &Coordinate, radius_m: f64) -> bool {
    distance_meters(current, target) <= radius_m
}
