use serde_json::json;

use vigil_core::{DetectionMethod, Result, Severity, VigilError};

use super::{context, Finding};
use crate::stats;

/// Compares each value against the band of the `window_size` values strictly before it.
///
/// The current value never contributes to its own baseline. Positions before
/// the first full window have no history and are never flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageDetector {
    window_size: usize,
    sigma: f64,
}

impl MovingAverageDetector {
    pub fn new(window_size: usize, sigma: f64) -> Result<Self> {
        if window_size < 2 {
            return Err(VigilError::invalid(
                "moving_average_window",
                format!("must be >= 2, got {}", window_size),
            ));
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(VigilError::invalid(
                "moving_average_sigma",
                format!("must be a positive number, got {}", sigma),
            ));
        }
        Ok(Self { window_size, sigma })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Finding> {
        if values.len() <= self.window_size {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for i in self.window_size..values.len() {
            let window = &values[i - self.window_size..i];
            let (ma, std) = stats::mean_std(window);
            // A flat window has no band to leave.
            if std <= f64::EPSILON {
                continue;
            }

            let x = values[i];
            let deviation = (x - ma).abs();
            if deviation >= self.sigma * std {
                let ratio = deviation / std;
                findings.push(Finding {
                    index: i,
                    method: DetectionMethod::MovingAverage,
                    observed: x,
                    expected: Some(ma),
                    severity: severity_for_ratio(ratio),
                    description: format!("Moving average deviation: {:.2}", deviation),
                    context: context([
                        ("deviation", json!(deviation)),
                        ("window_std_dev", json!(std)),
                        ("sigma_ratio", json!(ratio)),
                    ]),
                });
            }
        }
        findings
    }
}

fn severity_for_ratio(ratio: f64) -> Severity {
    if ratio >= 5.0 {
        Severity::Critical
    } else if ratio >= 3.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + if i % 2 == 0 { 1.5 } else { -1.5 }).collect()
    }

    #[test]
    fn flags_jump_against_trailing_window() {
        let mut values = noisy(20);
        values[15] = 140.0;
        let findings = MovingAverageDetector::new(7, 2.0).unwrap().detect(&values);
        assert!(findings.iter().any(|f| f.index == 15));
        assert_eq!(findings[0].index, 15);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn never_flags_before_first_full_window() {
        let values = vec![1.0, 500.0, -300.0, 2.0, 900.0, 1.0, 3.0, 2.0, 1.0, 2.0, 3.0, 1.0];
        let window = 5;
        let findings = MovingAverageDetector::new(window, 0.5).unwrap().detect(&values);
        assert!(findings.iter().all(|f| f.index >= window));
    }

    #[test]
    fn flat_window_is_skipped() {
        let mut values = vec![10.0; 8];
        values.push(50.0);
        assert!(MovingAverageDetector::new(7, 2.0).unwrap().detect(&values).is_empty());
    }

    #[test]
    fn series_no_longer_than_window() {
        let d = MovingAverageDetector::new(7, 2.0).unwrap();
        assert!(d.detect(&noisy(7)).is_empty());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(MovingAverageDetector::new(1, 2.0).is_err());
        assert!(MovingAverageDetector::new(0, 2.0).is_err());
        assert!(MovingAverageDetector::new(5, 0.0).is_err());
    }
}
