//! Severity policy applied by the engine on top of the detectors' own scales.
//!
//! Detectors assign a base severity. The engine may only raise it:
//! agreement between methods upgrades one step, contextual findings are
//! floored at `High`, rapid-transfer chains are always `Critical`.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use vigil_core::{Anomaly, DetectionMethod, Severity};

use crate::detectors::Finding;

/// Number of agreeing statistical methods at one index that earns an upgrade.
pub const CONCURRENCE_UPGRADE_METHODS: usize = 3;

/// Collapse all findings for one index into a single finding.
///
/// The highest severity wins, ties go to the method declared first. The
/// winner's context gains `agreeing_methods`. Returns `None` for no findings.
pub fn resolve_index(mut findings: Vec<Finding>) -> Option<Finding> {
    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.method.cmp(&b.method)));

    let mut agreeing: Vec<DetectionMethod> = findings.iter().map(|f| f.method).collect();
    agreeing.sort();
    agreeing.dedup();

    let mut winner = findings.into_iter().next()?;
    if agreeing.len() >= CONCURRENCE_UPGRADE_METHODS {
        winner.severity = winner.severity.upgraded();
    }
    winner.context.insert(
        "agreeing_methods".to_string(),
        json!(agreeing.iter().map(DetectionMethod::as_str).collect::<Vec<_>>()),
    );
    Some(winner)
}

/// Group findings by index and resolve each group. Output is ordered by index.
pub fn merge_findings(findings: impl IntoIterator<Item = Finding>) -> Vec<Finding> {
    let mut by_index: BTreeMap<usize, Vec<Finding>> = BTreeMap::new();
    for f in findings {
        by_index.entry(f.index).or_default().push(f);
    }
    by_index.into_values().filter_map(resolve_index).collect()
}

/// Collapse anomalies of one series that share an index, such as a
/// statistical anomaly and a level shift at the same position.
///
/// Same winner rule as [`resolve_index`], without the agreement upgrade; the
/// winner's `agreeing_methods` becomes the union over the group. Output is
/// ordered by index.
pub fn merge_by_index(anomalies: impl IntoIterator<Item = Anomaly>) -> Vec<Anomaly> {
    let mut by_index: BTreeMap<Option<usize>, Vec<Anomaly>> = BTreeMap::new();
    for a in anomalies {
        by_index.entry(a.record_ref.index()).or_default().push(a);
    }

    let mut out = Vec::with_capacity(by_index.len());
    for (_, mut group) in by_index {
        if group.len() == 1 {
            out.extend(group);
            continue;
        }
        group.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.method.cmp(&b.method)));

        let mut agreeing: Vec<DetectionMethod> = group.iter().flat_map(methods_of).collect();
        agreeing.sort();
        agreeing.dedup();

        let mut group = group.into_iter();
        if let Some(mut winner) = group.next() {
            winner.context.insert(
                "agreeing_methods".to_string(),
                json!(agreeing.iter().map(DetectionMethod::as_str).collect::<Vec<_>>()),
            );
            out.push(winner);
        }
    }
    out
}

/// The anomaly's own method plus any it already merged.
fn methods_of(anomaly: &Anomaly) -> Vec<DetectionMethod> {
    let mut methods = vec![anomaly.method];
    if let Some(Value::Array(names)) = anomaly.context.get("agreeing_methods") {
        methods.extend(
            names
                .iter()
                .filter_map(|n| serde_json::from_value::<DetectionMethod>(n.clone()).ok()),
        );
    }
    methods
}

/// Level shift size in pooled stddevs.
pub fn level_shift_severity(magnitude: f64) -> Severity {
    if magnitude >= 4.0 {
        Severity::Critical
    } else if magnitude >= 3.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

pub fn trend_change_severity(magnitude: f64) -> Severity {
    if magnitude >= 1.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Raise contextual anomalies to their minimum severity. Never lowers.
pub fn contextual_floor(method: DetectionMethod, severity: Severity) -> Severity {
    match method {
        DetectionMethod::FraudPattern => Severity::Critical,
        m if m.is_contextual() => severity.max(Severity::High),
        _ => severity,
    }
}
