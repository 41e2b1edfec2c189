//! DetectionConfig rule kind: thresholds, method selection and contextual
//! parameters for one detection profile.

use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_core::DetectionConfig;

use crate::loader::{Result, RuleError};
use crate::schema::{CommonMetadata, API_VERSION};

pub const KIND: &str = "DetectionConfig";

/// Top-level DetectionConfig rule document.
///
/// `spec` is a plain `DetectionConfig`: every field is optional and unknown
/// fields are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfigRule {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: CommonMetadata,
    #[serde(default)]
    pub spec: DetectionConfig,
}

impl DetectionConfigRule {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rule: Self = serde_yaml::from_str(yaml)?;
        rule.check_envelope()?;
        Ok(rule)
    }

    /// Envelope checks that serde cannot express.
    pub fn check_envelope(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(RuleError::Validation(format!(
                "unsupported apiVersion '{}', expected '{}'",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != KIND {
            return Err(RuleError::Validation(format!(
                "expected kind '{}', found '{}'",
                KIND, self.kind
            )));
        }
        if self.metadata.id.trim().is_empty() {
            return Err(RuleError::Validation(
                "rule metadata.id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate the `spec` section and hand back a config the engine will accept.
    pub fn compile(&self) -> Result<DetectionConfig> {
        self.check_envelope()?;
        self.spec.validate()?;
        debug!(rule_id = %self.metadata.id, "compiled detection config");
        Ok(self.spec.clone())
    }
}
