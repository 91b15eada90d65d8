//! Shared domain types for the reduction pipeline.

pub mod types;

pub use types::*;
