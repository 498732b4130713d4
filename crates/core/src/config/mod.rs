//! Configuration loading and schema definitions
//!
//! TOML file with `[checkin]`, `[api]` and `[telemetry]` sections; every
//! section and field has a default.

mod loader;
mod schema;

pub use loader::Config;
pub use schema::*;
