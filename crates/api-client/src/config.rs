//! Client configuration: the `[api]` TOML section with environment overrides
//!
//! | Variable                              | Overrides           |
//! |---------------------------------------|---------------------|
//! | `CAREVISIT_API_URL` / `SUPABASE_URL`  | `api.base_url`      |
//! | `CAREVISIT_TIMEOUT_SECS`              | `api.timeout_secs`  |
//! | `SUPABASE_ANON_KEY`                   | (env only)          |
//! | `SUPABASE_ACCESS_TOKEN`               | (env only)          |
//! | `CAREVISIT_ENV`                       | (env only)          |

use crate::error::{ApiError, ApiResult};
use carevisit_core::config::ApiConfig;
use carevisit_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// `supabase start` default
const LOCAL_SUPABASE_URL: &str = "http://localhost:54321";

/// Deployment the client talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local Supabase
    Development,
    /// Pre-release project
    Staging,
    /// Live project
    #[default]
    Production,
}

impl Environment {
    /// Unknown or empty values mean production
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "development" | "dev" | "local" => Self::Development,
            "staging" | "stage" => Self::Staging,
            _ => Self::Production,
        }
    }
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Supabase project URL (without `/rest/v1`)
    pub base_url: String,
    /// Sent as `apikey`
    pub anon_key: Option<String>,
    /// The signed-in worker's JWT; row-level security scopes visits to it
    pub access_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Backoff for reads. Writes always go out once.
    pub read_retry: RetryConfig,
    /// Deployment, from `CAREVISIT_ENV`
    pub environment: Environment,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: LOCAL_SUPABASE_URL.to_string(),
            anon_key: None,
            access_token: None,
            timeout: Duration::from_secs(30),
            read_retry: RetryConfig::interactive(),
            environment: Environment::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration from environment variables alone
    pub fn from_env() -> ApiResult<Self> {
        Self::from_settings(&ApiConfig::default())
    }

    /// Layer environment variables over the `[api]` configuration section
    pub fn from_settings(settings: &ApiConfig) -> ApiResult<Self> {
        Self::resolve(settings, |name| env::var(name).ok())
    }

    fn resolve(settings: &ApiConfig, var: impl Fn(&str) -> Option<String>) -> ApiResult<Self> {
        let environment = Environment::parse(&var("CAREVISIT_ENV").unwrap_or_default());

        let base_url = var("CAREVISIT_API_URL")
            .or_else(|| var("SUPABASE_URL"))
            .or_else(|| settings.base_url.clone())
            .ok_or_else(|| {
                ApiError::config(
                    "set CAREVISIT_API_URL or SUPABASE_URL, or api.base_url in carevisit.toml",
                )
            })?;

        let timeout_secs = match var("CAREVISIT_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::config(format!("CAREVISIT_TIMEOUT_SECS is not a number: {raw}")))?,
            None => settings.timeout_secs,
        };

        // Local stacks fail fast
        let read_retry = match environment {
            Environment::Development => RetryConfig::no_retry(),
            Environment::Staging | Environment::Production => settings.read_retry.clone(),
        };

        let config = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: var("SUPABASE_ANON_KEY"),
            access_token: var("SUPABASE_ACCESS_TOKEN"),
            timeout: Duration::from_secs(timeout_secs),
            read_retry,
            environment,
        };
        config.validate()?;
        Ok(config)
    }

    /// Local Supabase, no retries
    #[must_use]
    pub fn development() -> Self {
        Self {
            anon_key: env::var("SUPABASE_ANON_KEY").ok(),
            timeout: Duration::from_secs(10),
            read_retry: RetryConfig::no_retry(),
            environment: Environment::Development,
            ..Self::default()
        }
    }

    /// PostgREST root for this project
    #[must_use]
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base_url)
    }

    /// Set the project URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Act as the worker holding `token`
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the read backoff
    #[must_use]
    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    /// Reject configurations no request could succeed with
    pub fn validate(&self) -> ApiResult<()> {
        let problem = if self.base_url.is_empty() {
            "base_url cannot be empty"
        } else if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            "base_url must start with http:// or https://"
        } else if self.timeout.is_zero() {
            "timeout cannot be zero"
        } else if self.read_retry.max_attempts == 0 {
            "read_retry.max_attempts must be at least 1"
        } else {
            return Ok(());
        };
        Err(ApiError::config(problem))
    }
}
