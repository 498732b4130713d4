//! Configuration schema definitions

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use carevisit_geo::DistanceUnits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration schema
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSchema {
    #[serde(default)]
    pub checkin: CheckInConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl ConfigSchema {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.checkin.validate()?;
        self.api.validate()
    }
}

/// Check-in screen configuration
///
/// The proximity radius is a global constant, not a setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInConfig {
    /// Bounded wait for the one-shot precise fix, in milliseconds
    #[serde(default = "default_precise_fix_timeout_ms")]
    pub precise_fix_timeout_ms: u64,

    /// Units used to render distances
    #[serde(default)]
    pub units: DistanceUnits,
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            precise_fix_timeout_ms: default_precise_fix_timeout_ms(),
            units: DistanceUnits::default(),
        }
    }
}

impl CheckInConfig {
    /// The precise-fix bound as a duration
    pub fn precise_fix_timeout(&self) -> Duration {
        Duration::from_millis(self.precise_fix_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.precise_fix_timeout_ms == 0 {
            return Err(Error::config_invalid(
                "checkin.precise_fix_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_precise_fix_timeout_ms() -> u64 {
    15_000
}

/// Backend access configuration; environment variables override these
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Supabase project URL, e.g. `https://abc.supabase.co`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Backoff for visit reads (writes are never retried automatically)
    #[serde(default = "RetryConfig::interactive")]
    pub read_retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
            read_retry: RetryConfig::interactive(),
        }
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::config_invalid(
                    "api.base_url must start with http:// or https://",
                ));
            }
        }
        if self.timeout_secs == 0 {
            return Err(Error::config_invalid("api.timeout_secs must be greater than zero"));
        }
        if self.read_retry.max_attempts == 0 {
            return Err(Error::config_invalid("api.read_retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
