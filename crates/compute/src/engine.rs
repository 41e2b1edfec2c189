use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use vigil_core::series::validate_values;
use vigil_core::{
    Anomaly, DetectionConfig, DetectionMethod, MetricSeries, RecordRef, RejectedRecord, Result,
    TransactionRecord, VigilError,
};

use crate::behavior::{BehaviorAnalyzer, ChangeDirection, ChangePoint};
use crate::contextual::{ContextualDetector, TransactionReport};
use crate::detectors::{Finding, StatisticalDetector};
use crate::severity;

/// Key under which contextual anomalies appear in a `DetectionReport`.
pub const TRANSACTIONS_KEY: &str = "transactions";

/// Result of a full detection run over many series and a transaction batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Anomalies per series name, plus `transactions` for contextual results.
    /// A series has at most one anomaly per index, behavior methods included.
    pub anomalies: BTreeMap<String, Vec<Anomaly>>,
    /// Transaction records refused before analysis.
    #[serde(default)]
    pub rejected_records: Vec<RejectedRecord>,
    /// Series that could not be analyzed, with the reason.
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

impl DetectionReport {
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty() && self.rejected_records.is_empty() && self.failures.is_empty()
    }

    pub fn total_anomalies(&self) -> usize {
        self.anomalies.values().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| VigilError::Serialize(e.to_string()))
    }
}

/// Orchestrates every detector. Holds nothing but its configuration, so
/// each call is reproducible from its inputs.
#[derive(Debug, Clone)]
pub struct AnomalyDetectionEngine {
    config: DetectionConfig,
}

impl AnomalyDetectionEngine {
    /// Validate `config` and build an engine around it.
    pub fn new(config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run the configured statistical methods over one sequence.
    ///
    /// Findings at the same index are merged into one anomaly; the result is
    /// ordered by index.
    pub fn detect_metric_anomalies(&self, name: &str, values: &[f64]) -> Result<Vec<Anomaly>> {
        validate_values(name, values)?;
        self.statistical_anomalies(name, values, None)
    }

    /// Like [`detect_metric_anomalies`](Self::detect_metric_anomalies), with
    /// the series' timestamps attached to each anomaly.
    pub fn detect_series(&self, series: &MetricSeries) -> Result<Vec<Anomaly>> {
        series.validate()?;
        self.statistical_anomalies(&series.name, &series.values, Some(series))
    }

    /// Trend reversals and level shifts as anomalies, ordered by index.
    pub fn analyze_behavior(&self, name: &str, values: &[f64]) -> Result<Vec<Anomaly>> {
        validate_values(name, values)?;
        self.behavior_anomalies(name, values, None)
    }

    pub fn analyze_behavior_series(&self, series: &MetricSeries) -> Result<Vec<Anomaly>> {
        series.validate()?;
        self.behavior_anomalies(&series.name, &series.values, Some(series))
    }

    /// Contextual checks over a transaction batch.
    pub fn detect_transaction_anomalies(
        &self,
        records: &[TransactionRecord],
    ) -> Result<TransactionReport> {
        Ok(ContextualDetector::from_config(&self.config)?.detect(records))
    }

    /// Analyze every series and the transaction batch in one call.
    ///
    /// A series that fails validation is recorded in `failures` without
    /// affecting the others. Series run on the rayon pool when
    /// `config.parallel` is set; the report is identical either way.
    pub fn detect_all_anomalies(
        &self,
        metrics: &[MetricSeries],
        transactions: &[TransactionRecord],
    ) -> Result<DetectionReport> {
        self.config.validate()?;
        let start = Instant::now();
        let mut report = DetectionReport::default();

        let mut seen = BTreeSet::new();
        let mut unique = Vec::with_capacity(metrics.len());
        for series in metrics {
            if series.name == TRANSACTIONS_KEY && !transactions.is_empty() {
                report.failures.insert(
                    series.name.clone(),
                    format!("series name `{}` is reserved for transaction results", TRANSACTIONS_KEY),
                );
            } else if !seen.insert(series.name.as_str()) {
                report
                    .failures
                    .insert(series.name.clone(), "duplicate series name".to_string());
            } else {
                unique.push(series);
            }
        }

        let results: Vec<(String, Result<Vec<Anomaly>>)> = if self.config.parallel {
            unique
                .par_iter()
                .map(|s| (s.name.clone(), self.analyze_one(s)))
                .collect()
        } else {
            unique
                .iter()
                .map(|s| (s.name.clone(), self.analyze_one(s)))
                .collect()
        };

        for (name, result) in results {
            match result {
                Ok(anomalies) => {
                    report.anomalies.insert(name, anomalies);
                }
                Err(e) => {
                    warn!(metric = %name, error = %e, "series analysis failed");
                    report.failures.insert(name, e.to_string());
                }
            }
        }

        if !transactions.is_empty() {
            let txn_report = self.detect_transaction_anomalies(transactions)?;
            report
                .anomalies
                .insert(TRANSACTIONS_KEY.to_string(), txn_report.anomalies);
            report.rejected_records = txn_report.rejected;
        }

        info!(
            series = metrics.len(),
            transactions = transactions.len(),
            anomalies = report.total_anomalies(),
            failures = report.failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "detection run complete"
        );
        Ok(report)
    }

    fn analyze_one(&self, series: &MetricSeries) -> Result<Vec<Anomaly>> {
        let anomalies = self.detect_series(series)?;
        if !self.config.include_behavior {
            return Ok(anomalies);
        }
        let behavior = self.analyze_behavior_series(series)?;
        Ok(severity::merge_by_index(anomalies.into_iter().chain(behavior)))
    }

    fn statistical_anomalies(
        &self,
        name: &str,
        values: &[f64],
        series: Option<&MetricSeries>,
    ) -> Result<Vec<Anomaly>> {
        let detectors = self
            .config
            .methods
            .iter()
            .map(|&m| StatisticalDetector::from_config(m, &self.config))
            .collect::<Result<Vec<_>>>()?;

        let findings = detectors.iter().flat_map(|d| d.detect(values));
        let anomalies: Vec<Anomaly> = severity::merge_findings(findings)
            .into_iter()
            .map(|f| finding_to_anomaly(name, f, series))
            .collect();

        debug!(
            metric = %name,
            values = values.len(),
            anomalies = anomalies.len(),
            "metric detection complete"
        );
        Ok(anomalies)
    }

    fn behavior_anomalies(
        &self,
        name: &str,
        values: &[f64],
        series: Option<&MetricSeries>,
    ) -> Result<Vec<Anomaly>> {
        let analyzer = BehaviorAnalyzer::new(self.config.behavior_window, self.config.trend_noise_floor)?;
        let shifts = analyzer.detect_level_shifts(values, self.config.level_shift_threshold)?;
        let trends = analyzer.detect_trend_changes(values);

        let mut anomalies: Vec<Anomaly> = shifts
            .into_iter()
            .map(|p| change_to_anomaly(name, DetectionMethod::LevelShift, p, analyzer.window(), series))
            .chain(
                trends
                    .into_iter()
                    .map(|p| change_to_anomaly(name, DetectionMethod::TrendChange, p, analyzer.window(), series)),
            )
            .collect();
        anomalies.sort_by(|a, b| {
            a.record_ref
                .index()
                .cmp(&b.record_ref.index())
                .then(a.method.cmp(&b.method))
        });

        debug!(metric = %name, anomalies = anomalies.len(), "behavior analysis complete");
        Ok(anomalies)
    }
}

fn finding_to_anomaly(name: &str, finding: Finding, series: Option<&MetricSeries>) -> Anomaly {
    Anomaly {
        metric_name: name.to_string(),
        record_ref: RecordRef::Index(finding.index),
        observed_value: finding.observed,
        expected_value: finding.expected,
        method: finding.method,
        severity: finding.severity,
        description: finding.description,
        timestamp: series.and_then(|s| s.timestamp_at(finding.index)),
        context: finding.context,
    }
}

fn change_to_anomaly(
    name: &str,
    method: DetectionMethod,
    point: ChangePoint,
    window: usize,
    series: Option<&MetricSeries>,
) -> Anomaly {
    let direction = match point.direction {
        ChangeDirection::Up => "up",
        ChangeDirection::Down => "down",
    };
    let (severity, description) = match method {
        DetectionMethod::LevelShift => (
            severity::level_shift_severity(point.magnitude),
            format!(
                "Level shift {} at index {}: mean moved from {:.2} to {:.2} ({:.2} std devs)",
                direction, point.index, point.before, point.after, point.magnitude
            ),
        ),
        _ => (
            severity::trend_change_severity(point.magnitude),
            format!(
                "Trend change {} at index {}: slope {:.3} became {:.3}",
                direction, point.index, point.before, point.after
            ),
        ),
    };

    let mut context = BTreeMap::new();
    context.insert("direction".to_string(), json!(direction));
    context.insert("magnitude".to_string(), json!(point.magnitude));
    context.insert("window".to_string(), json!(window));

    Anomaly {
        metric_name: name.to_string(),
        record_ref: RecordRef::Index(point.index),
        observed_value: point.after,
        expected_value: Some(point.before),
        method,
        severity,
        description,
        timestamp: series.and_then(|s| s.timestamp_at(point.index)),
        context,
    }
}
