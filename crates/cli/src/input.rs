//! JSON batch input for `vigil detect`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use vigil_compute::DetectionReport;
use vigil_core::transaction::parse_transaction_batch;
use vigil_core::{MetricSeries, RejectedRecord, TransactionRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchInput {
    /// Each metric is a list of numbers or `{"values": [..], "timestamps": [..]}`.
    /// Kept loose so one malformed series fails alone.
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    /// Loosely typed so one bad record does not sink the whole batch.
    #[serde(default)]
    pub transactions: Vec<Value>,
}

pub struct Batch {
    pub metrics: Vec<MetricSeries>,
    pub transactions: Vec<TransactionRecord>,
    pub rejected: Vec<RejectedRecord>,
    /// Series that could not be decoded, keyed by name.
    pub failures: BTreeMap<String, String>,
}

impl BatchInput {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid batch file {}", path.display()))
    }

    pub fn into_batch(self) -> Batch {
        let mut metrics = Vec::with_capacity(self.metrics.len());
        let mut failures = BTreeMap::new();
        for (name, raw) in self.metrics {
            match decode_series(&name, raw) {
                Ok(series) => metrics.push(series),
                Err(reason) => {
                    warn!(metric = %name, %reason, "series not decoded");
                    failures.insert(name, reason);
                }
            }
        }
        let (transactions, rejected) = parse_transaction_batch(self.transactions);
        Batch {
            metrics,
            transactions,
            rejected,
            failures,
        }
    }
}

/// Fold decoding problems into the engine's report: input rejections come
/// first, series that never reached the engine join `failures`.
pub fn merge_input_problems(
    report: &mut DetectionReport,
    mut rejected: Vec<RejectedRecord>,
    failures: BTreeMap<String, String>,
) {
    rejected.append(&mut report.rejected_records);
    report.rejected_records = rejected;
    report.failures.extend(failures);
}

fn decode_series(name: &str, raw: Value) -> std::result::Result<MetricSeries, String> {
    match raw {
        Value::Array(items) => Ok(MetricSeries::new(name, decode_values(name, &items)?)),
        Value::Object(mut fields) => {
            if let Some(key) = fields.keys().find(|k| *k != "values" && *k != "timestamps") {
                return Err(format!("series `{}` has unknown field `{}`", name, key));
            }
            let values = match fields.remove("values") {
                Some(Value::Array(items)) => decode_values(name, &items)?,
                Some(other) => {
                    return Err(format!("series `{}`: `values` must be an array, got {}", name, other))
                }
                None => return Err(format!("series `{}` is missing `values`", name)),
            };
            let series = MetricSeries::new(name, values);
            match fields.remove("timestamps") {
                None | Some(Value::Null) => Ok(series),
                Some(ts) => {
                    let timestamps: Vec<DateTime<Utc>> = serde_json::from_value(ts)
                        .map_err(|e| format!("series `{}`: invalid timestamps: {}", name, e))?;
                    Ok(series.with_timestamps(timestamps))
                }
            }
        }
        other => Err(format!(
            "series `{}` must be an array of numbers or an object with `values`, got {}",
            name, other
        )),
    }
}

fn decode_values(name: &str, items: &[Value]) -> std::result::Result<Vec<f64>, String> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_f64().ok_or_else(|| {
                format!("series `{}` value at index {} is not a number: {}", name, index, item)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_metric_shapes() {
        let input: BatchInput = serde_json::from_str(
            r#"{
                "metrics": {
                    "latency": [1.0, 2.0, 3.0],
                    "errors": {"values": [0, 1], "timestamps": ["2024-03-01T00:00:00Z", "2024-03-01T00:01:00Z"]}
                }
            }"#,
        )
        .unwrap();
        let batch = input.into_batch();
        assert_eq!(batch.metrics.len(), 2);
        let errors = batch.metrics.iter().find(|m| m.name == "errors").unwrap();
        assert!(errors.timestamps.is_some());
        assert!(batch.transactions.is_empty());
    }

    #[test]
    fn bad_transactions_become_rejections() {
        let input: BatchInput = serde_json::from_str(
            r#"{"transactions": [
                {"transaction_id": "T1", "from_account": "A", "to_account": "B",
                 "amount": 10.0, "timestamp": "2024-03-01T00:00:00Z", "status": "completed"},
                {"transaction_id": "T2", "amount": "lots"}
            ]}"#,
        )
        .unwrap();
        let batch = input.into_batch();
        assert_eq!(batch.transactions.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].reference, "T2");
    }

    #[test]
    fn non_numeric_value_fails_only_its_series() {
        let input: BatchInput =
            serde_json::from_str(r#"{"metrics": {"good": [1, 2, 3], "bad": [1.0, "x"]}}"#).unwrap();
        let batch = input.into_batch();
        assert_eq!(batch.metrics.len(), 1);
        assert_eq!(batch.metrics[0].name, "good");
        let reason = &batch.failures["bad"];
        assert!(reason.contains("bad"));
        assert!(reason.contains("index 1"));
    }

    #[test]
    fn malformed_series_shapes_are_described() {
        let input: BatchInput = serde_json::from_str(
            r#"{"metrics": {
                "scalar": 5,
                "no_values": {"timestamps": []},
                "extra": {"values": [1], "unit": "ms"},
                "bad_ts": {"values": [1], "timestamps": ["yesterday"]}
            }}"#,
        )
        .unwrap();
        let batch = input.into_batch();
        assert!(batch.metrics.is_empty());
        assert!(batch.failures["scalar"].contains("array of numbers"));
        assert!(batch.failures["no_values"].contains("missing `values`"));
        assert!(batch.failures["extra"].contains("unit"));
        assert!(batch.failures["bad_ts"].contains("timestamps"));
    }

    #[test]
    fn decode_failures_reach_the_report() {
        let input: BatchInput =
            serde_json::from_str(r#"{"metrics": {"good": [1, 2, 3], "bad": [1.0, "x"]}}"#).unwrap();
        let batch = input.into_batch();
        let engine = vigil_compute::AnomalyDetectionEngine::new(Default::default()).unwrap();
        let mut report = engine.detect_all_anomalies(&batch.metrics, &batch.transactions).unwrap();
        merge_input_problems(&mut report, batch.rejected, batch.failures);
        assert!(report.anomalies.contains_key("good"));
        assert!(report.failures["bad"].contains("index 1"));
    }

    #[test]
    fn unknown_top_level_key_is_refused() {
        assert!(serde_json::from_str::<BatchInput>(r#"{"metric": {}}"#).is_err());
    }
}
