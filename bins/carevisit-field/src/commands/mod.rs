//! Command implementations

pub mod distance;
pub mod simulate;
pub mod visit;
