//! Error types for the API client

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// API client errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure: connect, TLS, timeout
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A body that did not match the expected rows
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-2xx response
    #[error("API error ({status}): {message}")]
    ApiResponse {
        /// HTTP status code
        status: u16,
        /// PostgREST error code such as `PGRST116`, when the body carried one
        code: Option<String>,
        /// Error message from the body
        message: String,
    },

    /// No visit with this id is visible to the caller
    #[error("Visit not found: {0}")]
    NotFound(String),

    /// The visit left `scheduled` before our write landed
    #[error("Visit {0} is no longer scheduled")]
    Conflict(String),

    /// The care recipient's location could not be decoded
    #[error("Invalid target location: {0}")]
    InvalidLocation(#[from] carevisit_geo::GeoError),

    /// Refused locally while the backend is failing
    #[error("Circuit breaker is open - service temporarily unavailable")]
    CircuitOpen,

    /// Every read attempt failed with a retryable error
    #[error("All {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Last error message
        last_error: String,
    },
}

/// PostgREST error body
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: String,
    #[serde(default)]
    hint: Option<String>,
}

impl ApiError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an API response error without a PostgREST code
    pub fn api_response(status: u16, message: impl Into<String>) -> Self {
        Self::ApiResponse {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Build from a non-2xx response body, which PostgREST sends as JSON
    #[must_use]
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<PostgrestError>(body) {
            Ok(err) => Self::ApiResponse {
                status,
                code: err.code,
                message: match err.hint {
                    Some(hint) => format!("{} ({hint})", err.message),
                    None => err.message,
                },
            },
            Err(_) if body.trim().is_empty() => Self::api_response(status, "empty response body"),
            Err(_) => Self::api_response(status, body.trim()),
        }
    }

    /// Transient failures worth another read attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::ApiResponse { status, .. } => *status >= 500 || *status == 429,
            Self::CircuitOpen
            | Self::Config(_)
            | Self::Json(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::InvalidLocation(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Another actor changed the visit underneath us
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::ApiResponse { status: 409, .. })
    }
}

impl From<ApiError> for carevisit_core::Error {
    fn from(err: ApiError) -> Self {
        use carevisit_core::ErrorCode;
        let code = match &err {
            ApiError::NotFound(_) => ErrorCode::VisitNotFound,
            e if e.is_conflict() => ErrorCode::VisitConflict,
            ApiError::InvalidLocation(_) => ErrorCode::InvalidTargetLocation,
            ApiError::Config(_) => ErrorCode::ConfigError,
            _ => ErrorCode::VisitError,
        };
        carevisit_core::Error::new(code, err.to_string()).with_source(err)
    }
}

/// Which request failed, for log lines
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Correlation id sent as `X-Request-ID`
    pub request_id: Option<String>,
    /// Path below the REST root
    pub endpoint: String,
    /// HTTP method
    pub method: String,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)?;
        if let Some(id) = &self.request_id {
            write!(f, " (request_id: {id})")?;
        }
        Ok(())
    }
}
