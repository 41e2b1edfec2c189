//! [`RuleLoader`]: scans a directory of DetectionConfig rules and resolves
//! `extends` chains between them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use vigil_core::DetectionConfig;

use crate::detection_config::DetectionConfigRule;

use super::error::{LoadResult, LoadStatus, Result, RuleError};
use super::extends;

/// Filesystem-backed store of DetectionConfig rules keyed by `metadata.id`.
pub struct RuleLoader {
    rules_dir: PathBuf,
    rules: BTreeMap<String, DetectionConfigRule>,
}

impl RuleLoader {
    /// The directory is not touched until [`load_all`](Self::load_all).
    pub fn new(rules_dir: PathBuf) -> Self {
        Self {
            rules_dir,
            rules: BTreeMap::new(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Scan the directory recursively and replace the in-memory rule set.
    ///
    /// Dotfiles and non-YAML files are skipped. A file that fails to parse,
    /// resolve or compile is reported in its `LoadResult` and does not stop
    /// the scan.
    pub fn load_all(&mut self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        let mut files = Vec::new();
        collect_yaml_files(&self.rules_dir, &mut files, &mut results)?;

        let mut raw: BTreeMap<String, serde_yaml::Value> = BTreeMap::new();
        let mut origin: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in files {
            match read_raw(&path) {
                Ok((id, value)) => {
                    if let Some(first) = origin.get(&id) {
                        let error = format!("duplicate rule id '{}' (first defined in {})", id, first.display());
                        warn!(path = %path.display(), %error, "failed to load rule file");
                        results.push(LoadResult { path, status: LoadStatus::Failed { error } });
                        continue;
                    }
                    raw.insert(id.clone(), value);
                    origin.insert(id, path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load rule file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }

        self.rules.clear();
        for (id, path) in origin {
            match build_rule(&id, &raw) {
                Ok(rule) => {
                    info!(rule_id = %id, path = %path.display(), "loaded rule");
                    self.rules.insert(id.clone(), rule);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { rule_id: id },
                    });
                }
                Err(e) => {
                    warn!(rule_id = %id, path = %path.display(), error = %e, "failed to load rule file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }

        Ok(results)
    }

    pub fn get(&self, id: &str) -> Option<&DetectionConfigRule> {
        self.rules.get(id)
    }

    /// Loaded rules in id order, disabled ones included.
    pub fn rules(&self) -> impl Iterator<Item = &DetectionConfigRule> {
        self.rules.values()
    }

    /// Compiled config of an enabled rule.
    pub fn compile(&self, id: &str) -> Result<DetectionConfig> {
        let rule = self
            .rules
            .get(id)
            .ok_or_else(|| RuleError::Validation(format!("no rule with id '{}'", id)))?;
        if !rule.metadata.enabled {
            return Err(RuleError::Validation(format!("rule '{}' is disabled", id)));
        }
        rule.compile()
    }
}

/// Load one standalone rule file. Files that `extends` another rule need
/// the rest of their directory and must go through [`RuleLoader`].
pub fn load_rule_file(path: &Path) -> Result<DetectionConfigRule> {
    let contents = fs::read_to_string(path)?;
    let rule = DetectionConfigRule::from_yaml(&contents)?;
    if let Some(parent) = &rule.metadata.extends {
        return Err(RuleError::Validation(format!(
            "rule '{}' extends '{}'; load its directory instead of a single file",
            rule.metadata.id, parent
        )));
    }
    Ok(rule)
}

/// [`load_rule_file`] followed by compilation.
pub fn load_detection_config(path: &Path) -> Result<DetectionConfig> {
    load_rule_file(path)?.compile()
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>, results: &mut Vec<LoadResult>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read directory");
            return Ok(());
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry?.path());
    }
    paths.sort();

    for path in paths {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            if path.is_file() {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped { reason: "dotfile".to_string() },
                });
            }
            continue;
        }

        if path.is_dir() {
            collect_yaml_files(&path, files, results)?;
            continue;
        }

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yml" || e == "yaml");
        if is_yaml {
            files.push(path);
        } else {
            results.push(LoadResult {
                path,
                status: LoadStatus::Skipped { reason: "not a YAML file".to_string() },
            });
        }
    }
    Ok(())
}

fn read_raw(path: &Path) -> Result<(String, serde_yaml::Value)> {
    let contents = fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
    let id = value
        .get("metadata")
        .and_then(|m| m.get("id"))
        .and_then(serde_yaml::Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| RuleError::Validation("rule metadata.id must not be empty".to_string()))?;
    Ok((id.to_string(), value))
}

fn build_rule(id: &str, raw: &BTreeMap<String, serde_yaml::Value>) -> Result<DetectionConfigRule> {
    let merged = extends::resolve(id, raw).map_err(RuleError::Validation)?;
    let rule: DetectionConfigRule = serde_yaml::from_value(merged)?;
    rule.check_envelope()?;
    rule.spec.validate()?;
    Ok(rule)
}
