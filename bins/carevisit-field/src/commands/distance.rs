//! Distance between two coordinates, as the check-in gate sees it

use anyhow::Result;
use carevisit_geo::{
    distance_meters, format_distance_in, is_within_radius, Coordinate, DistanceUnits,
    CHECK_IN_RADIUS_M,
};
use owo_colors::OwoColorize;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DistanceReport {
    pub from: Coordinate,
    pub to: Coordinate,
    pub distance_m: f64,
    pub display: String,
    pub radius_m: f64,
    pub within_radius: bool,
}

pub fn measure(from: Coordinate, to: Coordinate, units: DistanceUnits) -> Result<DistanceReport> {
    if !from.is_valid() || !to.is_valid() {
        return Err(carevisit_core::Error::invalid_input(
            "coordinates must be finite, latitude within ±90 and longitude within ±180",
        )
        .into());
    }
    let distance_m = distance_meters(&from, &to);
    Ok(DistanceReport {
        from,
        to,
        distance_m,
        display: format_distance_in(distance_m, units),
        radius_m: CHECK_IN_RADIUS_M,
        within_radius: is_within_radius(&from, &to, CHECK_IN_RADIUS_M),
    })
}

/// Run the `distance` command
pub fn run(from: Coordinate, to: Coordinate, units: DistanceUnits, format: &str) -> Result<()> {
    let report = measure(from, to, units)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let verdict = if report.within_radius {
        "within check-in radius".green().to_string()
    } else {
        "outside check-in radius".red().to_string()
    };
    println!(
        "{} {} {}  {:.2} m ({})  {}",
        report.from,
        "→".dimmed(),
        report.to,
        report.distance_m,
        report.display.cyan(),
        verdict
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_inside_radius() {
        let report = measure(
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 0.00005),
            DistanceUnits::Metric,
        )
        .unwrap();
        assert!(report.within_radius);
        assert_eq!(report.display, "6 m");
    }

    #[test]
    fn test_measure_rejects_invalid() {
        assert!(measure(
            Coordinate::new(95.0, 0.0),
            Coordinate::new(0.0, 0.0),
            DistanceUnits::Metric
        )
        .unwrap_err()
        .downcast_ref::<carevisit_core::Error>()
        .is_some_and(|e| e.code == carevisit_core::ErrorCode::InvalidInput));
    }
}
