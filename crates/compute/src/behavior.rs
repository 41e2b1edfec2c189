//! Behavioral analysis: trend reversals and sudden level shifts.
//!
//! Used for performance/throughput metrics where the shape of the series
//! matters more than individual outliers. Results carry a magnitude and
//! direction only; the engine maps magnitude to severity.

use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_core::{Result, VigilError};

use crate::stats;

/// Direction of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    /// Level went up, or a falling trend turned upward.
    Up,
    /// Level went down, or a rising trend turned downward.
    Down,
}

/// A position where the behavior of the series changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub index: usize,
    /// Trend change: difference of normalized slopes. Level shift: shift in pooled stddevs.
    pub magnitude: f64,
    pub direction: ChangeDirection,
    /// Mean (level shift) or slope (trend change) of the window before `index`.
    pub before: f64,
    /// Mean (level shift) or slope (trend change) of the window starting at `index`.
    pub after: f64,
}

/// Stateless analyzer; every call is independent.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorAnalyzer {
    window: usize,
    noise_floor: f64,
}

impl BehaviorAnalyzer {
    pub fn new(window: usize, noise_floor: f64) -> Result<Self> {
        if window < 2 {
            return Err(VigilError::invalid(
                "behavior_window",
                format!("must be >= 2, got {}", window),
            ));
        }
        if !(noise_floor.is_finite() && noise_floor >= 0.0) {
            return Err(VigilError::invalid(
                "trend_noise_floor",
                format!("must be >= 0, got {}", noise_floor),
            ));
        }
        Ok(Self { window, noise_floor })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Positions where the local slope flips sign.
    ///
    /// Slopes of the windows before and after `i` are least-squares fits,
    /// divided by the stddev of the combined 2·window values so the noise
    /// floor is scale free. Both slopes must clear the floor.
    pub fn detect_trend_changes(&self, values: &[f64]) -> Vec<ChangePoint> {
        let w = self.window;
        if values.len() < 2 * w {
            return Vec::new();
        }

        let mut raw = Vec::new();
        for i in w..=values.len() - w {
            let combined = &values[i - w..i + w];
            let scale = stats::sample_std_dev(combined);
            if scale <= f64::EPSILON {
                continue;
            }
            let before = stats::linear_slope(&values[i - w..i]);
            let after = stats::linear_slope(&values[i..i + w]);
            let (nb, na) = (before / scale, after / scale);

            if nb.abs() <= self.noise_floor || na.abs() <= self.noise_floor {
                continue;
            }
            if nb.signum() == na.signum() {
                continue;
            }

            raw.push(ChangePoint {
                index: i,
                magnitude: (na - nb).abs(),
                direction: if na > 0.0 { ChangeDirection::Up } else { ChangeDirection::Down },
                before,
                after,
            });
        }

        let points = collapse_runs(raw);
        debug!(points = points.len(), window = w, "trend change analysis complete");
        points
    }

    /// Positions where the mean of the following window differs from the
    /// preceding one by more than `threshold` pooled stddevs.
    pub fn detect_level_shifts(&self, values: &[f64], threshold: f64) -> Result<Vec<ChangePoint>> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(VigilError::invalid(
                "level_shift_threshold",
                format!("must be a positive number, got {}", threshold),
            ));
        }
        let w = self.window;
        if values.len() < 2 * w {
            return Ok(Vec::new());
        }

        let mut raw = Vec::new();
        for i in w..=values.len() - w {
            let before = &values[i - w..i];
            let after = &values[i..i + w];
            let mean_before = stats::mean(before);
            let mean_after = stats::mean(after);
            let pooled = pooled_std_dev(before, after, &values[i - w..i + w]);
            if pooled <= f64::EPSILON {
                continue;
            }

            let shift = (mean_after - mean_before) / pooled;
            if shift.abs() > threshold {
                raw.push(ChangePoint {
                    index: i,
                    magnitude: shift.abs(),
                    direction: if shift > 0.0 { ChangeDirection::Up } else { ChangeDirection::Down },
                    before: mean_before,
                    after: mean_after,
                });
            }
        }

        let points = collapse_runs(raw);
        debug!(points = points.len(), window = w, threshold, "level shift analysis complete");
        Ok(points)
    }
}

/// Pooled within-window stddev of two equal-length windows.
///
/// Two perfectly flat windows have no within-window spread; the stddev of
/// the combined values is used instead so a clean step still has a scale.
fn pooled_std_dev(before: &[f64], after: &[f64], combined: &[f64]) -> f64 {
    let vb = stats::sample_std_dev(before).powi(2);
    let va = stats::sample_std_dev(after).powi(2);
    let nb = before.len().saturating_sub(1) as f64;
    let na = after.len().saturating_sub(1) as f64;
    let pooled = if nb + na > 0.0 {
        ((nb * vb + na * va) / (nb + na)).sqrt()
    } else {
        0.0
    };
    if pooled > f64::EPSILON {
        pooled
    } else {
        stats::sample_std_dev(combined)
    }
}

/// Adjacent indices describe the same change; keep the strongest of each run.
fn collapse_runs(points: Vec<ChangePoint>) -> Vec<ChangePoint> {
    let mut out: Vec<ChangePoint> = Vec::new();
    let mut last_index: Option<usize> = None;

    for p in points {
        let continues_run = last_index.is_some_and(|li| p.index == li + 1);
        last_index = Some(p.index);
        match out.last_mut() {
            Some(best) if continues_run => {
                if p.magnitude > best.magnitude {
                    *best = p;
                }
            }
            _ => out.push(p),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(window: usize) -> BehaviorAnalyzer {
        BehaviorAnalyzer::new(window, 0.05).unwrap()
    }

    #[test]
    fn step_change_is_one_level_shift() {
        let mut values = vec![100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.0, 101.0, 99.0, 100.0];
        values.extend([150.0, 151.0, 149.0, 150.0, 152.0, 148.0, 150.0, 151.0, 149.0, 150.0]);
        let shifts = analyzer(5).detect_level_shifts(&values, 2.0).unwrap();
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 10);
        assert_eq!(shifts[0].direction, ChangeDirection::Up);
        assert!(shifts[0].magnitude > 2.0);
    }

    #[test]
    fn drop_in_level_points_down() {
        let mut values = vec![50.0; 6];
        values.extend(vec![10.0; 6]);
        values[1] = 51.0;
        values[8] = 11.0;
        let shifts = analyzer(4).detect_level_shifts(&values, 1.5).unwrap();
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 6);
        assert_eq!(shifts[0].direction, ChangeDirection::Down);
    }

    #[test]
    fn constant_series_has_no_changes() {
        let a = analyzer(3);
        assert!(a.detect_level_shifts(&[4.0; 30], 2.0).unwrap().is_empty());
        assert!(a.detect_trend_changes(&[4.0; 30]).is_empty());
    }

    #[test]
    fn peak_is_a_downward_trend_change() {
        // Rises to index 10, then falls.
        let values: Vec<f64> = (0..21).map(|i| 100.0 - (i as f64 - 10.0).abs() * 5.0).collect();
        let changes = analyzer(5).detect_trend_changes(&values);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].direction, ChangeDirection::Down);
        assert!((9..=11).contains(&changes[0].index));
        assert!(changes[0].before > 0.0);
        assert!(changes[0].after < 0.0);
    }

    #[test]
    fn valley_is_an_upward_trend_change() {
        let values: Vec<f64> = (0..21).map(|i| (i as f64 - 10.0).abs() * 3.0).collect();
        let changes = analyzer(5).detect_trend_changes(&values);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].direction, ChangeDirection::Up);
    }

    #[test]
    fn monotonic_series_has_no_reversal() {
        let values: Vec<f64> = (0..40).map(|i| i as f64 * 2.0).collect();
        assert!(analyzer(5).detect_trend_changes(&values).is_empty());
    }

    #[test]
    fn short_series_returns_nothing() {
        let a = analyzer(10);
        assert!(a.detect_trend_changes(&[1.0, 5.0, 2.0]).is_empty());
        assert!(a.detect_level_shifts(&[1.0, 5.0, 2.0], 2.0).unwrap().is_empty());
    }

    #[test]
    fn invalid_parameters() {
        assert!(BehaviorAnalyzer::new(1, 0.05).is_err());
        assert!(BehaviorAnalyzer::new(5, -0.1).is_err());
        assert!(analyzer(5).detect_level_shifts(&[1.0; 20], 0.0).is_err());
    }

    #[test]
    fn collapse_keeps_strongest_of_each_run() {
        let cp = |index, magnitude| ChangePoint {
            index,
            magnitude,
            direction: ChangeDirection::Up,
            before: 0.0,
            after: 0.0,
        };
        let out = collapse_runs(vec![cp(3, 1.0), cp(4, 3.0), cp(5, 2.0), cp(9, 1.5)]);
        assert_eq!(out.iter().map(|p| p.index).collect::<Vec<_>>(), vec![4, 9]);
    }
}
