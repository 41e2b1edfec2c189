//! Typed schema for YAML rule documents.

pub mod metadata;

pub use metadata::CommonMetadata;

/// The only document version this crate understands.
pub const API_VERSION: &str = "v1";
