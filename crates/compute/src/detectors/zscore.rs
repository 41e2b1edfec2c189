use serde_json::json;

use vigil_core::{DetectionMethod, Result, Severity, VigilError};

use super::{context, Finding};
use crate::stats;

/// Flags values whose distance from the whole-series mean exceeds `threshold` stddevs.
///
/// The mean and stddev include the candidate outliers themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct ZScoreDetector {
    threshold: f64,
}

impl ZScoreDetector {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(VigilError::invalid(
                "zscore_threshold",
                format!("must be a positive number, got {}", threshold),
            ));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Finding> {
        if values.len() < 2 {
            return Vec::new();
        }

        let (mean, std) = stats::mean_std(values);
        if std <= f64::EPSILON {
            return Vec::new();
        }

        values
            .iter()
            .enumerate()
            .filter_map(|(i, &x)| {
                let z = (x - mean) / std;
                (z.abs() >= self.threshold).then(|| Finding {
                    index: i,
                    method: DetectionMethod::Zscore,
                    observed: x,
                    expected: Some(mean),
                    severity: severity_for_z(z.abs()),
                    description: format!("Z-score anomaly: {:.2}", z),
                    context: context([("z_score", json!(z)), ("std_dev", json!(std))]),
                })
            })
            .collect()
    }
}

/// |z| < 3 → medium, < 4 → high, otherwise critical.
pub fn severity_for_z(abs_z: f64) -> Severity {
    if abs_z >= 4.0 {
        Severity::Critical
    } else if abs_z >= 3.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}
