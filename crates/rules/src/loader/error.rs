//! Error types and load result structures for the rule loader.

use std::path::PathBuf;

use vigil_core::VigilError;

/// Errors that can occur while loading or compiling a rule document.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Envelope problems: wrong kind, unsupported apiVersion, empty id, duplicates.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The `spec` section parsed but holds an unusable parameter.
    #[error("Invalid detection config: {0}")]
    Config(#[from] VigilError),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

/// Outcome of loading a single rule file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    Loaded { rule_id: String },
    /// Dotfile or non-YAML file.
    Skipped { reason: String },
    Failed { error: String },
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded { .. })
    }
}
