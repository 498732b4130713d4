//! Structured errors with codes, context and recovery suggestions
//!
//! Every failure that reaches a user carries an [`ErrorCode`]. The code's
//! [`Family`] decides the process exit code, and the code supplies a default
//! suggestion that callers may override.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Internal = 1001,
    Timeout = 1003,

    IoError = 2000,
    FileNotFound = 2001,
    PermissionDenied = 2002,

    ConfigError = 3000,
    ConfigNotFound = 3001,
    ConfigParseError = 3002,
    ConfigValidationError = 3003,

    LocationPermissionDenied = 4001,
    SensorUnavailable = 4002,
    PreciseFixTimeout = 4003,
    OutOfRange = 4004,
    InvalidTargetLocation = 4005,

    VisitError = 5000,
    VisitNotFound = 5001,
    VisitLoadFailed = 5002,
    VisitWriteFailed = 5003,
    VisitConflict = 5004,

    InvalidInput = 6001,
    InvalidFormat = 6002,
}

/// Groups of error codes, by thousands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    General,
    Io,
    Config,
    Location,
    Visit,
    Validation,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn family(self) -> Family {
        match self.code() / 1000 {
            2 => Family::Io,
            3 => Family::Config,
            4 => Family::Location,
            5 => Family::Visit,
            6 => Family::Validation,
            _ => Family::General,
        }
    }

    /// Process exit code for a command that failed with this code
    pub fn exit_code(self) -> i32 {
        match (self, self.family()) {
            (Self::Timeout | Self::PreciseFixTimeout, _) => exit_codes::TIMEOUT,
            (_, Family::Config) => exit_codes::CONFIG_ERROR,
            (_, Family::Validation) => exit_codes::VALIDATION_ERROR,
            (_, Family::Location | Family::Visit) => exit_codes::CHECK_IN_FAILED,
            _ => exit_codes::FAILURE,
        }
    }

    /// What the user can do about it, when there is something
    pub fn suggestion(self) -> Option<&'static str> {
        let hint = match self {
            Self::LocationPermissionDenied => {
                "Allow location access in system settings, or use the alternate check-in"
            }
            Self::SensorUnavailable => "Enable location services, or use the alternate check-in",
            Self::PreciseFixTimeout => "Move to an open area and try again",
            Self::OutOfRange => "Move closer to the recipient's address and try again",
            Self::VisitConflict => {
                "Refresh the schedule; the visit may have been cancelled or reassigned"
            }
            Self::ConfigNotFound => "Create a carevisit.toml file or omit --config to use defaults",
            Self::FileNotFound => "Check that the file exists and you have read permissions",
            _ => return None,
        };
        Some(hint)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    /// Outermost last
    pub context: Vec<String>,
    pub suggestion: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        for ctx in self.context.iter().rev() {
            write!(f, "\n  while {ctx}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  Suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

impl Error {
    /// New error carrying the code's default suggestion
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Vec::new(),
            suggestion: code.suggestion().map(str::to_string),
            source: None,
        }
    }

    /// Push a context line, e.g. `"loading carevisit.toml"`
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigValidationError, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Exit codes for CLI commands
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const VALIDATION_ERROR: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    /// The session ended without a recorded check-in
    pub const CHECK_IN_FAILED: i32 = 4;
    /// The worker took the alternate check-in path
    pub const FALLBACK_TAKEN: i32 = 5;
    pub const TIMEOUT: i32 = 124;
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            _ => ErrorCode::IoError,
        };
        Self::new(code, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::InvalidFormat, format!("JSON parse error: {err}")).with_source(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorCode::ConfigParseError, format!("TOML parse error: {err}")).with_source(err)
    }
}

impl From<carevisit_geo::GeoError> for Error {
    fn from(err: carevisit_geo::GeoError) -> Self {
        Self::new(
            ErrorCode::InvalidTargetLocation,
            format!("Invalid target location: {err}"),
        )
        .with_source(err)
    }
}

/// Attach context to any result whose error converts into [`Error`]
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_suggestion(self, suggestion: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_suggestion(self, suggestion: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_suggestion(suggestion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::FileNotFound.to_string(), "E2001");
        assert_eq!(ErrorCode::OutOfRange.to_string(), "E4004");
    }

    #[test]
    fn test_families_and_exit_codes() {
        assert_eq!(ErrorCode::IoError.family(), Family::Io);
        assert_eq!(ErrorCode::SensorUnavailable.family(), Family::Location);
        assert_eq!(ErrorCode::Internal.family(), Family::General);

        assert_eq!(ErrorCode::VisitConflict.exit_code(), exit_codes::CHECK_IN_FAILED);
        assert_eq!(ErrorCode::PreciseFixTimeout.exit_code(), exit_codes::TIMEOUT);
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(ErrorCode::InvalidInput.exit_code(), exit_codes::VALIDATION_ERROR);
        assert_eq!(ErrorCode::IoError.exit_code(), exit_codes::FAILURE);
    }

    #[test]
    fn test_default_suggestion_can_be_overridden() {
        let err = Error::new(ErrorCode::VisitConflict, "Visit v-42 is no longer scheduled");
        assert!(err.suggestion.as_deref().unwrap().contains("Refresh"));

        let err = err.with_suggestion("Ask the dispatcher");
        assert_eq!(err.suggestion.as_deref(), Some("Ask the dispatcher"));
        assert!(Error::new(ErrorCode::IoError, "disk").suggestion.is_none());
    }

    #[test]
    fn test_context_stack_display() {
        let err = Error::new(ErrorCode::VisitWriteFailed, "write failed")
            .with_context("recording check-in")
            .with_context("running simulate");

        let text = err.to_string();
        assert!(text.starts_with("[E5003] write failed"));
        let outer = text.find("while running simulate").unwrap();
        let inner = text.find("while recording check-in").unwrap();
        assert!(outer < inner);
    }

    #[test]
    fn test_result_ext_converts_foreign_errors() {
        let parsed: std::result::Result<u8, serde_json::Error> = serde_json::from_str("{");
        let err = parsed.context("reading report").unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert_eq!(err.context, vec!["reading report".to_string()]);
        assert!(err.source.is_some());
    }

    #[test]
    fn test_geo_error_conversion() {
        let err: Error = carevisit_geo::GeoError::MissingLocation.into();
        assert_eq!(err.code, ErrorCode::InvalidTargetLocation);
        assert!(err.source.is_some());
    }
}
