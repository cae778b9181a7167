//! Data models for sqlscope.
//!
//! This module re-exports all model types used throughout the crate.

pub mod options;
pub mod query;
pub mod spec;

// Re-export commonly used types
pub use options::{DbOptions, IdentifierMapper, NamingStrategy, ResultStrategy};
pub use query::{QueryDescriptor, QueryOutcome, QueryParam, Record, ResultMode};
pub use spec::{DatabaseSpec, DatabaseType, DelimiterStyle, SpecError};
