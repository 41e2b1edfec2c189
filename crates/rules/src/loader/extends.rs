//! `metadata.extends` inheritance between rule documents.
//!
//! Works on raw YAML values before typed deserialization, so a child only
//! needs to spell out the fields it changes.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

/// Longest parent chain followed before giving up.
pub const MAX_EXTENDS_DEPTH: usize = 5;

/// Lay `child` over `parent`. Mappings merge key by key, anything else
/// (scalars, sequences) is taken from the child whole.
pub fn overlay(parent: &Value, child: &Value) -> Value {
    let (Value::Mapping(base), Value::Mapping(top)) = (parent, child) else {
        return child.clone();
    };
    let mut merged: Mapping = base.clone();
    for (key, value) in top {
        let combined = match base.get(key) {
            Some(existing) => overlay(existing, value),
            None => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    Value::Mapping(merged)
}

/// Parent id named by a raw document's `metadata.extends`, if any.
pub fn parent_of(doc: &Value) -> Option<&str> {
    doc.get("metadata")?.get("extends")?.as_str()
}

/// Fold the chain of ancestors of `id` into one document, root first.
pub fn resolve(id: &str, docs: &BTreeMap<String, Value>) -> Result<Value, String> {
    let mut chain: Vec<&str> = vec![id];
    let mut current = docs
        .get(id)
        .ok_or_else(|| format!("rule '{}' not found", id))?;

    while let Some(parent) = parent_of(current) {
        if chain.contains(&parent) {
            return Err(format!(
                "circular extends chain: {} -> {}",
                chain.join(" -> "),
                parent
            ));
        }
        if chain.len() > MAX_EXTENDS_DEPTH {
            return Err(format!(
                "extends chain of '{}' is deeper than {}",
                id, MAX_EXTENDS_DEPTH
            ));
        }
        current = docs
            .get(parent)
            .ok_or_else(|| format!("rule '{}' extends unknown rule '{}'", chain[chain.len() - 1], parent))?;
        chain.push(parent);
    }

    let mut merged = Value::Null;
    for ancestor in chain.iter().rev() {
        if let Some(doc) = docs.get(*ancestor) {
            merged = if merged.is_null() {
                doc.clone()
            } else {
                overlay(&merged, doc)
            };
        }
    }
    keep_own_enabled(&mut merged, docs.get(id));
    Ok(merged)
}

/// `metadata.enabled` describes one document and is never inherited: the
/// resolved rule carries the child's own flag, or none.
fn keep_own_enabled(merged: &mut Value, own: Option<&Value>) {
    let own = own.and_then(|doc| doc.get("metadata")?.get("enabled")).cloned();
    let Some(Value::Mapping(metadata)) = merged.get_mut("metadata") else {
        return;
    };
    let key = Value::from("enabled");
    match own {
        Some(flag) => {
            metadata.insert(key, flag);
        }
        None => {
            metadata.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn child_scalars_and_lists_win() {
        let parent = yaml("spec: {zscore_threshold: 2.5, methods: [zscore, iqr], parallel: true}");
        let child = yaml("spec: {zscore_threshold: 3.5, methods: [iqr]}");
        let merged = overlay(&parent, &child);
        assert_eq!(merged["spec"]["zscore_threshold"], yaml("3.5"));
        assert_eq!(merged["spec"]["methods"], yaml("[iqr]"));
        assert_eq!(merged["spec"]["parallel"], yaml("true"));
    }

    #[test]
    fn grandchild_inherits_through_chain() {
        let mut docs = BTreeMap::new();
        docs.insert("base".to_string(), yaml("metadata: {id: base}\nspec: {iqr_multiplier: 1.5, zscore_threshold: 2.5}"));
        docs.insert("mid".to_string(), yaml("metadata: {id: mid, extends: base}\nspec: {zscore_threshold: 3.0}"));
        docs.insert("leaf".to_string(), yaml("metadata: {id: leaf, extends: mid}\nspec: {parallel: false}"));
        let leaf = resolve("leaf", &docs).unwrap();
        assert_eq!(leaf["metadata"]["id"], yaml("leaf"));
        assert_eq!(leaf["spec"]["iqr_multiplier"], yaml("1.5"));
        assert_eq!(leaf["spec"]["zscore_threshold"], yaml("3.0"));
        assert_eq!(leaf["spec"]["parallel"], yaml("false"));
    }

    #[test]
    fn disabled_parent_does_not_disable_child() {
        let mut docs = BTreeMap::new();
        docs.insert("base".to_string(), yaml("metadata: {id: base, enabled: false}\nspec: {zscore_threshold: 2.5}"));
        docs.insert("strict".to_string(), yaml("metadata: {id: strict, extends: base}\nspec: {zscore_threshold: 3.5}"));
        docs.insert("off".to_string(), yaml("metadata: {id: off, extends: strict, enabled: false}"));

        let strict = resolve("strict", &docs).unwrap();
        assert!(strict["metadata"].get("enabled").is_none());
        assert_eq!(strict["spec"]["zscore_threshold"], yaml("3.5"));

        let off = resolve("off", &docs).unwrap();
        assert_eq!(off["metadata"]["enabled"], yaml("false"));
    }

    #[test]
    fn cycles_are_reported() {
        let mut docs = BTreeMap::new();
        docs.insert("a".to_string(), yaml("metadata: {id: a, extends: b}"));
        docs.insert("b".to_string(), yaml("metadata: {id: b, extends: a}"));
        let err = resolve("a", &docs).unwrap_err();
        assert!(err.contains("circular"));
    }

    #[test]
    fn unknown_parent_is_reported() {
        let mut docs = BTreeMap::new();
        docs.insert("a".to_string(), yaml("metadata: {id: a, extends: ghost}"));
        assert!(resolve("a", &docs).unwrap_err().contains("ghost"));
    }
}
