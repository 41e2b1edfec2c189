//! YAML rule documents for the detection engine.
//!
//! This crate provides:
//! - the `DetectionConfig` rule kind (apiVersion/kind/metadata/spec)
//! - single-file and directory loading with `extends` inheritance
//! - compilation into a validated `vigil_core::DetectionConfig`

pub mod detection_config;
pub mod loader;
pub mod schema;

pub use detection_config::DetectionConfigRule;
pub use loader::{load_detection_config, load_rule_file, RuleError, RuleLoader};
