//! Endpoint-specific API implementations
//!
//! ## Mapping to the backend
//!
//! | Module | Table | Description |
//! |--------|-------|-------------|
//! | `visits` | `visits` (embeds `elders`) | Read a visit, start it on check-in |

pub mod visits;

pub use visits::{RecipientRow, StartVisit, VisitRow, VisitStatus, VisitsApi};
