use serde_json::json;

use vigil_core::{DetectionMethod, Result, Severity, VigilError};

use super::{context, Finding};
use crate::stats;

/// Minimum sequence length for meaningful quartiles.
const MIN_VALUES: usize = 4;

/// Tukey-fence outlier detection: `[Q1 − m·IQR, Q3 + m·IQR]`.
///
/// When IQR is zero the fences collapse onto Q1 and any value different
/// from Q1 is reported with medium severity.
#[derive(Debug, Clone, PartialEq)]
pub struct IqrDetector {
    multiplier: f64,
}

impl IqrDetector {
    pub fn new(multiplier: f64) -> Result<Self> {
        if !(multiplier.is_finite() && multiplier >= 0.0) {
            return Err(VigilError::invalid(
                "iqr_multiplier",
                format!("must be >= 0, got {}", multiplier),
            ));
        }
        Ok(Self { multiplier })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Finding> {
        if values.len() < MIN_VALUES {
            return Vec::new();
        }

        let sorted = stats::sorted(values);
        let q1 = stats::quantile_sorted(&sorted, 0.25);
        let q3 = stats::quantile_sorted(&sorted, 0.75);
        let median = stats::quantile_sorted(&sorted, 0.5);
        let iqr = q3 - q1;
        let lower = q1 - self.multiplier * iqr;
        let upper = q3 + self.multiplier * iqr;
        let degenerate = iqr <= f64::EPSILON;

        let mut findings = Vec::new();
        for (i, &x) in values.iter().enumerate() {
            let (label, excess) = if degenerate {
                if (x - q1).abs() <= f64::EPSILON {
                    continue;
                }
                (if x > q1 { "high_outlier" } else { "low_outlier" }, None)
            } else if x > upper {
                ("high_outlier", Some((x - upper) / iqr))
            } else if x < lower {
                ("low_outlier", Some((lower - x) / iqr))
            } else {
                continue;
            };

            let severity = excess.map_or(Severity::Medium, severity_for_excess);
            findings.push(Finding {
                index: i,
                method: DetectionMethod::Iqr,
                observed: x,
                expected: Some(median),
                severity,
                description: format!("IQR-based outlier: {}", label),
                context: context([
                    ("outlier_type", json!(label)),
                    ("q1", json!(q1)),
                    ("q3", json!(q3)),
                    ("lower_bound", json!(lower)),
                    ("upper_bound", json!(upper)),
                ]),
            });
        }
        findings
    }
}

/// Distance past the fence, in IQR widths.
fn severity_for_excess(excess: f64) -> Severity {
    if excess >= 6.0 {
        Severity::Critical
    } else if excess >= 3.0 {
        Severity::High
    } else if excess >= 1.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_single_high_outlier() {
        let values = [10.0, 15.0, 20.0, 18.0, 22.0, 19.0, 200.0];
        let findings = IqrDetector::new(1.5).unwrap().detect(&values);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].index, 6);
        assert_eq!(findings[0].context["outlier_type"], "high_outlier");
        assert_eq!(findings[0].expected, Some(19.0));
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn flags_low_outlier() {
        let values = [100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 3.0];
        let findings = IqrDetector::new(1.5).unwrap().detect(&values);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].index, 6);
        assert_eq!(findings[0].context["outlier_type"], "low_outlier");
    }

    #[test]
    fn constant_series_has_no_anomalies() {
        assert!(IqrDetector::new(1.5).unwrap().detect(&[3.3; 20]).is_empty());
    }

    #[test]
    fn zero_iqr_flags_everything_off_q1() {
        let values = [5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 9.0];
        let findings = IqrDetector::new(1.5).unwrap().detect(&values);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].index, 7);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn too_few_values() {
        assert!(IqrDetector::new(1.5).unwrap().detect(&[1.0, 2.0, 900.0]).is_empty());
    }

    #[test]
    fn excess_scale() {
        assert_eq!(severity_for_excess(0.5), Severity::Low);
        assert_eq!(severity_for_excess(1.0), Severity::Medium);
        assert_eq!(severity_for_excess(3.5), Severity::High);
        assert_eq!(severity_for_excess(10.0), Severity::Critical);
    }
}
