//! Supabase client for carevisit visit records
//!
//! A small PostgREST client for the two calls a check-in needs: reading the
//! visit (with the care recipient's address location) and the conditional
//! update that marks it started.
//!
//! # Features
//!
//! - **Environment-based configuration**: URLs, keys and the worker's token from env vars
//! - **Retry with exponential backoff**: reads only; writes are sent once
//! - **Circuit breaker**: fail fast during backend outages
//! - **Request correlation**: every request carries an `X-Request-ID`
//!
//! # Example
//!
//! ```rust,no_run
//! use carevisit_api_client::{CareVisitClient, StartVisit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CareVisitClient::new()?;
//!
//!     let visit = client.visits().get("3f1c").await?;
//!     println!("Target: {}", visit.target_location()?);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;

pub use client::CareVisitClient;
pub use config::{ClientConfig, Environment};
pub use endpoints::{RecipientRow, StartVisit, VisitRow, VisitStatus, VisitsApi};
pub use error::{ApiError, ApiResult};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::CareVisitClient;
    pub use crate::config::{ClientConfig, Environment};
    pub use crate::endpoints::{StartVisit, VisitRow, VisitStatus, VisitsApi};
    pub use crate::error::{ApiError, ApiResult};
}
