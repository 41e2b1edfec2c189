//! Contextual anomaly detection over transaction records.
//!
//! Records are always put into `(timestamp, transaction_id)` order before any
//! check runs, so results never depend on the order the caller supplied.
//!
//! Sub-modules:
//! - [`large_transaction`]: amounts far above the sender's baseline
//! - [`fraud`]: rapid transfers, repeated failures, cross-account abuse

pub mod fraud;
pub mod large_transaction;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::transaction::partition_valid;
use vigil_core::{
    Anomaly, DetectionConfig, RejectedRecord, Result, TransactionRecord, VigilError,
};

use crate::severity;

/// Output of a contextual pass: anomalies plus the records refused up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionReport {
    pub anomalies: Vec<Anomaly>,
    pub rejected: Vec<RejectedRecord>,
}

/// Parameters for every contextual check, lifted from `DetectionConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextualDetector {
    pub large_txn_k: f64,
    pub min_account_history: usize,
    pub rapid_window: Duration,
    pub rapid_count_threshold: usize,
    pub horizon: Duration,
    pub failure_count_threshold: usize,
    pub failure_rate_threshold: f64,
    pub fan_out_threshold: usize,
}

impl ContextualDetector {
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            large_txn_k: config.large_txn_k,
            min_account_history: config.min_account_history,
            rapid_window: window("rapid_window_seconds", config.rapid_window_seconds)?,
            rapid_count_threshold: config.rapid_count_threshold,
            horizon: window("fraud_horizon_seconds", config.fraud_horizon_seconds)?,
            failure_count_threshold: config.failure_count_threshold,
            failure_rate_threshold: config.failure_rate_threshold,
            fan_out_threshold: config.fan_out_threshold,
        })
    }

    /// Run every contextual check. Malformed records are reported, the rest analyzed.
    pub fn detect(&self, records: &[TransactionRecord]) -> TransactionReport {
        let (valid, rejected) = partition_valid(records);
        for r in &rejected {
            warn!(record = %r.reference, reason = %r.reason, "rejected transaction record");
        }

        let sorted = sort_chronologically(&valid);

        let mut anomalies = large_transaction::detect_large_transactions(
            &sorted,
            self.large_txn_k,
            self.min_account_history,
        );
        anomalies.extend(fraud::detect_rapid_transfers(
            &sorted,
            self.rapid_window,
            self.rapid_count_threshold,
            self.horizon,
        ));
        anomalies.extend(fraud::detect_repeated_failures(
            &sorted,
            self.horizon,
            self.failure_count_threshold,
            self.failure_rate_threshold,
        ));
        anomalies.extend(fraud::detect_cross_account(
            &sorted,
            self.horizon,
            self.fan_out_threshold,
        ));

        for anomaly in &mut anomalies {
            anomaly.severity = severity::contextual_floor(anomaly.method, anomaly.severity);
        }
        anomalies.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.method.cmp(&b.method))
                .then_with(|| a.record_ref.to_string().cmp(&b.record_ref.to_string()))
        });

        debug!(
            records = records.len(),
            rejected = rejected.len(),
            anomalies = anomalies.len(),
            "contextual detection complete"
        );

        TransactionReport { anomalies, rejected }
    }
}

fn window(parameter: &str, seconds: i64) -> Result<Duration> {
    Duration::try_seconds(seconds)
        .ok_or_else(|| VigilError::invalid(parameter, format!("{} seconds is out of range", seconds)))
}

/// Order by timestamp, ties broken by transaction id.
pub fn sort_chronologically(records: &[TransactionRecord]) -> Vec<&TransactionRecord> {
    let mut sorted: Vec<&TransactionRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    sorted
}

/// Seconds between two instants, with millisecond resolution.
pub(crate) fn seconds_between(earlier: &TransactionRecord, later: &TransactionRecord) -> f64 {
    (later.timestamp - earlier.timestamp).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};

    use vigil_core::{TransactionRecord, TransactionStatus};

    pub fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    pub fn txn(id: &str, from: &str, to: &str, amount: f64, seconds: i64) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.to_string(),
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount,
            timestamp: at(seconds),
            status: TransactionStatus::Completed,
        }
    }

    pub fn failed(id: &str, from: &str, to: &str, amount: f64, seconds: i64) -> TransactionRecord {
        TransactionRecord {
            status: TransactionStatus::Failed,
            ..txn(id, from, to, amount, seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use vigil_core::{DetectionMethod, Severity};

    fn detector() -> ContextualDetector {
        ContextualDetector::from_config(&DetectionConfig::default()).unwrap()
    }

    #[test]
    fn three_rapid_transfers_make_one_critical_pattern() {
        let records = vec![
            txn("T1", "ACC-1", "ACC-9", 20.0, 0),
            txn("T2", "ACC-1", "ACC-9", 25.0, 30),
            txn("T3", "ACC-1", "ACC-9", 22.0, 45),
        ];
        let report = detector().detect(&records);
        let fraud: Vec<_> = report
            .anomalies
            .iter()
            .filter(|a| a.method == DetectionMethod::FraudPattern)
            .collect();
        assert_eq!(fraud.len(), 1);
        assert_eq!(fraud[0].severity, Severity::Critical);
        assert_eq!(
            fraud[0].context["transaction_ids"],
            serde_json::json!(["T1", "T2", "T3"])
        );
    }

    #[test]
    fn sorting_breaks_ties_by_id() {
        let records = vec![
            txn("B", "X", "Y", 1.0, 10),
            txn("A", "X", "Y", 1.0, 10),
            txn("C", "X", "Y", 1.0, 5),
        ];
        let ids: Vec<_> = sort_chronologically(&records)
            .iter()
            .map(|r| r.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
    }

    #[test]
    fn shuffled_input_gives_identical_report() {
        let mut records = vec![
            txn("T1", "ACC-1", "ACC-2", 100.0, 0),
            txn("T2", "ACC-1", "ACC-3", 110.0, 10),
            txn("T3", "ACC-1", "ACC-4", 95.0, 20),
            txn("T4", "ACC-1", "ACC-5", 105.0, 30),
            txn("T5", "ACC-1", "ACC-6", 9_000.0, 40),
            failed("T6", "ACC-7", "ACC-2", 50.0, 50),
            failed("T7", "ACC-7", "ACC-2", 50.0, 51),
            failed("T8", "ACC-7", "ACC-2", 50.0, 52),
        ];
        let expected = detector().detect(&records);
        records.reverse();
        records.swap(1, 5);
        assert_eq!(detector().detect(&records), expected);
    }

    #[test]
    fn malformed_records_are_reported_not_dropped() {
        let mut bad = txn("T2", "ACC-1", "ACC-2", 10.0, 5);
        bad.amount = -10.0;
        let records = vec![txn("T1", "ACC-1", "ACC-2", 10.0, 0), bad];
        let report = detector().detect(&records);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reference, "T2");
    }

    #[test]
    fn out_of_range_windows_are_an_error_not_a_panic() {
        let cfg = DetectionConfig {
            rapid_window_seconds: 10_000_000_000_000_000,
            fraud_horizon_seconds: 10_000_000_000_000_000,
            ..DetectionConfig::default()
        };
        let err = ContextualDetector::from_config(&cfg).unwrap_err();
        assert!(matches!(err, VigilError::InvalidParameter { ref parameter, .. } if parameter == "rapid_window_seconds"));
        assert!(window("fraud_horizon_seconds", i64::MAX).is_err());
        assert_eq!(window("w", 60).unwrap(), Duration::seconds(60));
    }

    #[test]
    fn empty_input() {
        assert_eq!(detector().detect(&[]), TransactionReport::default());
    }
}
