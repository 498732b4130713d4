//! Error types for the geo crate.

use thiserror::Error;

/// Result type alias for geo operations.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Errors that can occur while decoding a location.
#[derive(Debug, Error)]
pub enum GeoError {
    /// The location field was null or absent
    #[error("Location is missing")]
    MissingLocation,

    /// Invalid WKT format
    #[error("Invalid WKT format: {0}")]
    InvalidWkt(String),

    /// Invalid (E)WKB payload
    #[error("Invalid WKB payload: {0}")]
    InvalidWkb(String),

    /// GeoJSON object that is not a point
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
