//! Human-readable distances for the check-in screen.
//!
//! Display only: gating always compares raw meters against the radius.

use serde::{Deserialize, Serialize};

const FEET_PER_METER: f64 = 3.280_84;
const FEET_PER_MILE: f64 = 5_280.0;

/// Unit system used when rendering distances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnits {
    /// Feet below 1,000 ft, miles above
    #[default]
    Imperial,
    /// Meters below 1 km, kilometers above
    Metric,
}

/// Formats a distance in meters using imperial units.
///
/// # Example
/// ```
/// use carevisit_geo::format_distance;
///
/// assert_eq!(format_distance(33.36), "109 ft");
/// assert_eq!(format_distance(1_609.344), "1.0 mi");
/// ```
pub fn format_distance(meters: f64) -> String {
    format_distance_in(meters, DistanceUnits::Imperial)
}

/// Formats a distance in meters in the requested unit system.
pub fn format_distance_in(meters: f64, units: DistanceUnits) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "unknown distance".to_string();
    }

    match units {
        DistanceUnits::Imperial => {
            let feet = meters * FEET_PER_METER;
            if feet < 1_000.0 {
                format!("{feet:.0} ft")
            } else {
                format!("{:.1} mi", feet / FEET_PER_MILE)
            }
        }
        DistanceUnits::Metric => {
            if meters < 1_000.0 {
                format!("{meters:.0} m")
            } else {
                format!("{:.1} km", meters / 1_000.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imperial_feet() {
        assert_eq!(format_distance(0.0), "0 ft");
        assert_eq!(format_distance(30.0), "98 ft");
        assert_eq!(format_distance(55.6), "182 ft");
    }

    #[test]
    fn test_imperial_miles() {
        assert_eq!(format_distance(2_000.0), "1.2 mi");
    }

    #[test]
    fn test_metric() {
        assert_eq!(format_distance_in(33.4, DistanceUnits::Metric), "33 m");
        assert_eq!(format_distance_in(1_240.0, DistanceUnits::Metric), "1.2 km");
    }

    #[test]
    fn test_unknown_distance() {
        assert_eq!(format_distance(f64::NAN), "unknown distance");
        assert_eq!(format_distance(f64::INFINITY), "unknown distance");
        assert_eq!(format_distance(-1.0), "unknown distance");
    }

    #[test]
    fn test_units_deserialize_lowercase() {
        let units: DistanceUnits = serde_json::from_str("\"metric\"").unwrap();
        assert_eq!(units, DistanceUnits::Metric);
    }
}
