//! Metadata block shared by every rule document.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommonMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Disabled rules still parse but are not handed to the engine.
    /// Not inherited through `extends`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Id of another rule whose fields this one starts from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

pub(crate) fn default_true() -> bool {
    true
}
