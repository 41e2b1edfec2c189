use serde_json::json;

use vigil_core::{DetectionMethod, Result, Severity, VigilError};

use super::{context, Finding};
use crate::stats;

/// Deviation, in stddevs of the bucket baseline, above which a value is seasonal noise no more.
pub const SEASONAL_DEVIATION_MULTIPLIER: f64 = 2.5;

/// Each value is compared with the other occurrences of its phase, so at
/// least this many occurrences are needed before a bucket is judged.
pub const MIN_BUCKET_OCCURRENCES: usize = 3;

/// Buckets positions by `index % period` and judges each value against its own phase.
///
/// The baseline for a value is the mean/stddev of the *other* values in its
/// bucket, which keeps a single spike from inflating its own spread.
/// Phases seen fewer than [`MIN_BUCKET_OCCURRENCES`] times are skipped, so
/// only positions whose phase recurs at least three times can be flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalityDetector {
    period: usize,
}

impl SeasonalityDetector {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(VigilError::invalid("seasonality_period", "must be >= 1"));
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for season_idx in 0..self.period.min(values.len()) {
            let positions: Vec<usize> = (season_idx..values.len()).step_by(self.period).collect();
            if positions.len() < MIN_BUCKET_OCCURRENCES {
                continue;
            }

            for (k, &i) in positions.iter().enumerate() {
                let others: Vec<f64> = positions
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != k)
                    .map(|(_, &p)| values[p])
                    .collect();
                let (mean, std) = stats::mean_std(&others);
                let x = values[i];
                let deviation = (x - mean).abs();

                let (z, severity) = if std <= f64::EPSILON {
                    if deviation <= f64::EPSILON * mean.abs().max(1.0) {
                        continue;
                    }
                    (None, Severity::High)
                } else {
                    let z = deviation / std;
                    if z <= SEASONAL_DEVIATION_MULTIPLIER {
                        continue;
                    }
                    (Some(z), severity_for_z(z))
                };

                let description = match z {
                    Some(z) => format!("Deviation from seasonal pattern (z-score: {:.2})", z),
                    None => "Deviation from a constant seasonal pattern".to_string(),
                };
                findings.push(Finding {
                    index: i,
                    method: DetectionMethod::Seasonality,
                    observed: x,
                    expected: Some(mean),
                    severity,
                    description,
                    context: context([
                        ("season_index", json!(season_idx)),
                        ("z_score", json!(z)),
                        ("period", json!(self.period)),
                    ]),
                });
            }
        }

        findings.sort_by_key(|f| f.index);
        findings
    }
}

fn severity_for_z(z: f64) -> Severity {
    if z >= 5.0 {
        Severity::Critical
    } else if z >= 3.5 {
        Severity::High
    } else {
        Severity::Medium
    }
}
