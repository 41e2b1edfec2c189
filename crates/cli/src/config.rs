//! Resolve the effective `DetectionConfig` for a CLI run.
//!
//! Layers, lowest first: built-in defaults, a rule file (or a rule from a
//! directory), then `VIGIL_*` env overrides for the active profile.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use vigil_core::DetectionConfig;
use vigil_rules::loader::LoadStatus;
use vigil_rules::{load_detection_config, RuleLoader};

pub fn resolve(
    config_file: Option<&Path>,
    rules_dir: Option<&Path>,
    rule_id: Option<&str>,
    profile: &str,
) -> Result<DetectionConfig> {
    let base = match (config_file, rules_dir, rule_id) {
        (Some(file), _, _) => load_detection_config(file)
            .with_context(|| format!("failed to load rule file {}", file.display()))?,
        (None, Some(dir), Some(id)) => from_rules_dir(dir, id)?,
        _ => {
            debug!("no rule file given, using defaults");
            DetectionConfig::default()
        }
    };

    let config = base
        .with_env_overrides(profile)
        .context("invalid VIGIL_* environment override")?;
    info!(profile = %profile, "detection config resolved");
    Ok(config)
}

fn from_rules_dir(dir: &Path, id: &str) -> Result<DetectionConfig> {
    let mut loader = RuleLoader::new(dir.to_path_buf());
    let results = loader
        .load_all()
        .with_context(|| format!("failed to scan rules directory {}", dir.display()))?;
    for r in &results {
        if let LoadStatus::Failed { error } = &r.status {
            tracing::warn!(path = %r.path.display(), %error, "rule file not loaded");
        }
    }
    if loader.get(id).is_none() {
        bail!("rule '{}' not found in {}", id, dir.display());
    }
    Ok(loader.compile(id)?)
}
