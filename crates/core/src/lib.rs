//! Core utilities shared by the carevisit crates
//!
//! - **Error handling**: structured errors with codes, context and recovery suggestions
//! - **Retry**: backoff policies and a circuit breaker for backend calls
//! - **Configuration**: TOML-based configuration with validation
//!
//! # Example
//!
//! ```rust,no_run
//! use carevisit_core::config::Config;
//!
//! let config = Config::load(None).expect("invalid configuration");
//! println!("precise fix bound: {:?}", config.schema.checkin.precise_fix_timeout());
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod retry;

pub use error::{Error, ErrorCode, Result, ResultExt};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CheckInConfig, Config, ConfigSchema};
    pub use crate::error::{exit_codes, Error, ErrorCode, Result, ResultExt};
    pub use crate::retry::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
}
