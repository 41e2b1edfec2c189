//! Filesystem loading of DetectionConfig rule documents.
//!
//! Single files go through [`load_rule_file`]; directories through
//! [`RuleLoader`], which also resolves `metadata.extends` between rules.

mod core;
mod error;
mod extends;


pub use self::core::{load_detection_config, load_rule_file, RuleLoader};
pub use self::error::{LoadResult, LoadStatus, Result, RuleError};
pub use self::extends::{overlay, MAX_EXTENDS_DEPTH};
