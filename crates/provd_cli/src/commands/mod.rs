//! CLI command implementations.

pub mod adapters;
pub mod serve;
