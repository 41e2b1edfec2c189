//! Statistical detectors over a single ordered numeric sequence.
//!
//! Each variant follows the same contract: sequence in, index-keyed
//! findings out. Too little data is not an error, it yields no findings.
//!
//! Sub-modules:
//! - [`zscore`]: global mean/stddev z-score
//! - [`iqr`]: Tukey fences around the interquartile range
//! - [`moving_average`]: strictly trailing window band
//! - [`seasonality`]: per-phase baselines for a fixed period

pub mod iqr;
pub mod moving_average;
pub mod seasonality;
pub mod zscore;

use std::collections::BTreeMap;

use vigil_core::{DetectionConfig, DetectionMethod, Result, Severity, VigilError};

pub use iqr::IqrDetector;
pub use moving_average::MovingAverageDetector;
pub use seasonality::SeasonalityDetector;
pub use zscore::ZScoreDetector;

/// One flagged position, before the engine turns it into an `Anomaly`.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub index: usize,
    pub method: DetectionMethod,
    pub observed: f64,
    pub expected: Option<f64>,
    pub severity: Severity,
    pub description: String,
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Closed set of statistical detectors behind one `detect` entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum StatisticalDetector {
    ZScore(ZScoreDetector),
    Iqr(IqrDetector),
    MovingAverage(MovingAverageDetector),
    Seasonality(SeasonalityDetector),
}

impl StatisticalDetector {
    /// Build the detector for `method` from the call's configuration.
    pub fn from_config(method: DetectionMethod, config: &DetectionConfig) -> Result<Self> {
        match method {
            DetectionMethod::Zscore => Ok(Self::ZScore(ZScoreDetector::new(config.zscore_threshold)?)),
            DetectionMethod::Iqr => Ok(Self::Iqr(IqrDetector::new(config.iqr_multiplier)?)),
            DetectionMethod::MovingAverage => Ok(Self::MovingAverage(MovingAverageDetector::new(
                config.moving_average_window,
                config.moving_average_sigma,
            )?)),
            DetectionMethod::Seasonality => Ok(Self::Seasonality(SeasonalityDetector::new(
                config.seasonality_period,
            )?)),
            other => Err(VigilError::invalid(
                "methods",
                format!("`{}` is not a statistical method", other),
            )),
        }
    }

    pub fn method(&self) -> DetectionMethod {
        match self {
            Self::ZScore(_) => DetectionMethod::Zscore,
            Self::Iqr(_) => DetectionMethod::Iqr,
            Self::MovingAverage(_) => DetectionMethod::MovingAverage,
            Self::Seasonality(_) => DetectionMethod::Seasonality,
        }
    }

    /// Findings ordered by index.
    pub fn detect(&self, values: &[f64]) -> Vec<Finding> {
        match self {
            Self::ZScore(d) => d.detect(values),
            Self::Iqr(d) => d.detect(values),
            Self::MovingAverage(d) => d.detect(values),
            Self::Seasonality(d) => d.detect(values),
        }
    }
}

/// Shorthand for building a finding's context map.
pub(crate) fn context<const N: usize>(
    entries: [(&str, serde_json::Value); N],
) -> BTreeMap<String, serde_json::Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
