use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered classification driving downstream alert routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step up, saturating at `Critical`.
    pub fn upgraded(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The method that produced an anomaly.
///
/// Declaration order doubles as the tie-break order when several methods
/// flag the same index with equal severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Zscore,
    Iqr,
    MovingAverage,
    Seasonality,
    TrendChange,
    LevelShift,
    LargeTransaction,
    FraudPattern,
    RepeatedFailures,
    CrossAccount,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Zscore => "zscore",
            DetectionMethod::Iqr => "iqr",
            DetectionMethod::MovingAverage => "moving_average",
            DetectionMethod::Seasonality => "seasonality",
            DetectionMethod::TrendChange => "trend_change",
            DetectionMethod::LevelShift => "level_shift",
            DetectionMethod::LargeTransaction => "large_transaction",
            DetectionMethod::FraudPattern => "fraud_pattern",
            DetectionMethod::RepeatedFailures => "repeated_failures",
            DetectionMethod::CrossAccount => "cross_account",
        }
    }

    /// Whether the method operates on transaction records rather than a numeric series.
    pub fn is_contextual(&self) -> bool {
        matches!(
            self,
            DetectionMethod::LargeTransaction
                | DetectionMethod::FraudPattern
                | DetectionMethod::RepeatedFailures
                | DetectionMethod::CrossAccount
        )
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points back into the input of the detection call that produced an anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordRef {
    /// Position in a metric series.
    Index(usize),
    /// `transaction_id` of a transaction record.
    Transaction(String),
}

impl RecordRef {
    pub fn index(&self) -> Option<usize> {
        match self {
            RecordRef::Index(i) => Some(*i),
            RecordRef::Transaction(_) => None,
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            RecordRef::Index(_) => None,
            RecordRef::Transaction(id) => Some(id.as_str()),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Index(i) => write!(f, "#{}", i),
            RecordRef::Transaction(id) => f.write_str(id),
        }
    }
}

/// A flagged observation. Produced by the engine, read-only for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric_name: String,
    pub record_ref: RecordRef,
    pub observed_value: f64,
    pub expected_value: Option<f64>,
    pub method: DetectionMethod,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl Anomaly {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
