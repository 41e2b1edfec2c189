use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::anomaly::DetectionMethod;
use crate::error::{Result, VigilError};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str) -> Result<Option<T>> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| VigilError::invalid(key, format!("cannot parse `{}`", raw))),
        None => Ok(None),
    }
}

macro_rules! override_from_env {
    ($cfg:ident, $profile:expr, $( $field:ident => $key:literal ),+ $(,)?) => {
        $(
            if let Some(v) = profiled_env_parse($profile, $key)? {
                $cfg.$field = v;
            }
        )+
    };
}

/// The statistical methods run when no explicit subset is configured.
pub const STATISTICAL_METHODS: [DetectionMethod; 4] = [
    DetectionMethod::Zscore,
    DetectionMethod::Iqr,
    DetectionMethod::MovingAverage,
    DetectionMethod::Seasonality,
];

/// Largest window, in seconds, that still fits a millisecond-resolution duration.
pub const MAX_WINDOW_SECONDS: i64 = i64::MAX / 1_000;

// ── Detection config ──────────────────────────────────────────

/// Tunables for a detection call. Every field is optional in serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// |z| at or above this flags a value.
    pub zscore_threshold: f64,
    /// Tukey fence multiplier applied to the interquartile range.
    pub iqr_multiplier: f64,
    /// Trailing window length for the moving-average detector.
    pub moving_average_window: usize,
    /// Stddev multiplier for the moving-average band.
    pub moving_average_sigma: f64,
    /// Cycle length for seasonal bucketing (e.g. 24 for hourly data).
    pub seasonality_period: usize,
    /// Pooled-stddev multiplier for level-shift detection.
    pub level_shift_threshold: f64,
    /// Gaps strictly below this many seconds count as rapid.
    pub rapid_window_seconds: i64,
    /// Minimum transactions in a rapid chain.
    pub rapid_count_threshold: usize,
    /// Stddev multiplier above the account baseline for large transactions.
    pub large_txn_k: f64,

    /// Statistical methods to run per series.
    pub methods: Vec<DetectionMethod>,
    /// Also run trend-change and level-shift analysis in batched detection.
    pub include_behavior: bool,
    /// Window used by both behavioral analyses.
    pub behavior_window: usize,
    /// Minimum normalized slope for a trend reversal to count.
    pub trend_noise_floor: f64,
    /// Prior completed transactions needed before an account gets its own baseline.
    pub min_account_history: usize,
    /// Sliding horizon for fraud-pattern checks, in seconds.
    pub fraud_horizon_seconds: i64,
    /// Failed transactions within the horizon needed to raise a failure signal.
    pub failure_count_threshold: usize,
    /// Failed share of the horizon window needed to raise a failure signal.
    pub failure_rate_threshold: f64,
    /// Distinct counterparties within the horizon that indicate cross-account abuse.
    pub fan_out_threshold: usize,
    /// Process independent series on the rayon pool.
    pub parallel: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: 2.5,
            iqr_multiplier: 1.5,
            moving_average_window: 7,
            moving_average_sigma: 2.0,
            seasonality_period: 24,
            level_shift_threshold: 2.0,
            rapid_window_seconds: 60,
            rapid_count_threshold: 3,
            large_txn_k: 3.0,
            methods: STATISTICAL_METHODS.to_vec(),
            include_behavior: false,
            behavior_window: 10,
            trend_noise_floor: 0.05,
            min_account_history: 3,
            fraud_horizon_seconds: 3600,
            failure_count_threshold: 3,
            failure_rate_threshold: 0.5,
            fan_out_threshold: 5,
            parallel: true,
        }
    }
}

impl DetectionConfig {
    /// Defaults overridden by `VIGIL_*` env vars (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE`; when set, `{PROFILE}_{KEY}` wins over `{KEY}`.
    pub fn from_env() -> Result<Self> {
        let profile = env_opt("VIGIL_PROFILE").unwrap_or_default().to_uppercase();
        Self::default().with_env_overrides(&profile)
    }

    /// Apply env overrides for a named profile (empty string = default) on top of `self`.
    pub fn with_env_overrides(mut self, profile: &str) -> Result<Self> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let cfg = &mut self;
        override_from_env!(cfg, p,
            zscore_threshold => "VIGIL_ZSCORE_THRESHOLD",
            iqr_multiplier => "VIGIL_IQR_MULTIPLIER",
            moving_average_window => "VIGIL_MOVING_AVERAGE_WINDOW",
            moving_average_sigma => "VIGIL_MOVING_AVERAGE_SIGMA",
            seasonality_period => "VIGIL_SEASONALITY_PERIOD",
            level_shift_threshold => "VIGIL_LEVEL_SHIFT_THRESHOLD",
            rapid_window_seconds => "VIGIL_RAPID_WINDOW_SECONDS",
            rapid_count_threshold => "VIGIL_RAPID_COUNT_THRESHOLD",
            large_txn_k => "VIGIL_LARGE_TXN_K",
            include_behavior => "VIGIL_INCLUDE_BEHAVIOR",
            behavior_window => "VIGIL_BEHAVIOR_WINDOW",
            trend_noise_floor => "VIGIL_TREND_NOISE_FLOOR",
            min_account_history => "VIGIL_MIN_ACCOUNT_HISTORY",
            fraud_horizon_seconds => "VIGIL_FRAUD_HORIZON_SECONDS",
            failure_count_threshold => "VIGIL_FAILURE_COUNT_THRESHOLD",
            failure_rate_threshold => "VIGIL_FAILURE_RATE_THRESHOLD",
            fan_out_threshold => "VIGIL_FAN_OUT_THRESHOLD",
            parallel => "VIGIL_PARALLEL",
        );
        if let Some(raw) = profiled_env_opt(p, "VIGIL_METHODS") {
            cfg.methods = parse_methods(&raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject parameter values no detector can work with.
    ///
    /// Called by the engine before any computation starts.
    pub fn validate(&self) -> Result<()> {
        positive("zscore_threshold", self.zscore_threshold)?;
        non_negative("iqr_multiplier", self.iqr_multiplier)?;
        at_least("moving_average_window", self.moving_average_window, 2)?;
        positive("moving_average_sigma", self.moving_average_sigma)?;
        at_least("seasonality_period", self.seasonality_period, 1)?;
        positive("level_shift_threshold", self.level_shift_threshold)?;
        window_seconds("rapid_window_seconds", self.rapid_window_seconds)?;
        at_least("rapid_count_threshold", self.rapid_count_threshold, 2)?;
        positive("large_txn_k", self.large_txn_k)?;

        if self.methods.is_empty() {
            return Err(VigilError::invalid("methods", "at least one method is required"));
        }
        if let Some(m) = self.methods.iter().find(|m| !STATISTICAL_METHODS.contains(m)) {
            return Err(VigilError::invalid(
                "methods",
                format!("`{}` is not a statistical method", m),
            ));
        }
        at_least("behavior_window", self.behavior_window, 2)?;
        non_negative("trend_noise_floor", self.trend_noise_floor)?;
        at_least("min_account_history", self.min_account_history, 1)?;
        window_seconds("fraud_horizon_seconds", self.fraud_horizon_seconds)?;
        if self.fraud_horizon_seconds < self.rapid_window_seconds {
            return Err(VigilError::invalid(
                "fraud_horizon_seconds",
                "must be at least rapid_window_seconds",
            ));
        }
        at_least("failure_count_threshold", self.failure_count_threshold, 1)?;
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(VigilError::invalid("failure_rate_threshold", "must be in (0, 1]"));
        }
        at_least("fan_out_threshold", self.fan_out_threshold, 2)?;
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Detection config loaded:");
        tracing::info!("  zscore:          threshold={}", self.zscore_threshold);
        tracing::info!("  iqr:             multiplier={}", self.iqr_multiplier);
        tracing::info!("  moving_average:  window={}, sigma={}", self.moving_average_window, self.moving_average_sigma);
        tracing::info!("  seasonality:     period={}", self.seasonality_period);
        tracing::info!("  behavior:        enabled={}, window={}, level_shift={}", self.include_behavior, self.behavior_window, self.level_shift_threshold);
        tracing::info!("  transactions:    rapid={}s x{}, large_k={}, horizon={}s", self.rapid_window_seconds, self.rapid_count_threshold, self.large_txn_k, self.fraud_horizon_seconds);
    }
}

fn parse_methods(raw: &str) -> Result<Vec<DetectionMethod>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            STATISTICAL_METHODS
                .iter()
                .copied()
                .find(|m| m.as_str() == name)
                .ok_or_else(|| VigilError::invalid("methods", format!("unknown method `{}`", name)))
        })
        .collect()
}

fn window_seconds(parameter: &str, value: i64) -> Result<()> {
    if value <= 0 || value > MAX_WINDOW_SECONDS {
        return Err(VigilError::invalid(
            parameter,
            format!("must be in 1..={}, got {}", MAX_WINDOW_SECONDS, value),
        ));
    }
    Ok(())
}

fn positive(parameter: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(VigilError::invalid(parameter, format!("must be a positive number, got {}", value)))
    }
}

fn non_negative(parameter: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VigilError::invalid(parameter, format!("must be >= 0, got {}", value)))
    }
}

fn at_least(parameter: &str, value: usize, min: usize) -> Result<()> {
    if value >= min {
        Ok(())
    } else {
        Err(VigilError::invalid(parameter, format!("must be >= {}, got {}", min, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_parameter(cfg: &DetectionConfig) -> String {
        match cfg.validate() {
            Err(VigilError::InvalidParameter { parameter, .. }) => parameter,
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn oversized_windows_are_rejected() {
        let cfg = DetectionConfig {
            rapid_window_seconds: 10_000_000_000_000_000,
            fraud_horizon_seconds: 10_000_000_000_000_000,
            ..DetectionConfig::default()
        };
        assert_eq!(invalid_parameter(&cfg), "rapid_window_seconds");

        let cfg = DetectionConfig {
            fraud_horizon_seconds: MAX_WINDOW_SECONDS + 1,
            ..DetectionConfig::default()
        };
        assert_eq!(invalid_parameter(&cfg), "fraud_horizon_seconds");

        let cfg = DetectionConfig {
            rapid_window_seconds: MAX_WINDOW_SECONDS,
            fraud_horizon_seconds: MAX_WINDOW_SECONDS,
            ..DetectionConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = DetectionConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.methods.len(), 4);
        assert_eq!(cfg.zscore_threshold, 2.5);
    }

    #[test]
    fn bad_window_names_parameter() {
        let cfg = DetectionConfig {
            moving_average_window: 1,
            ..Default::default()
        };
        assert_eq!(invalid_parameter(&cfg), "moving_average_window");
    }

    #[test]
    fn zero_period_is_rejected() {
        let cfg = DetectionConfig {
            seasonality_period: 0,
            ..Default::default()
        };
        assert_eq!(invalid_parameter(&cfg), "seasonality_period");
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let cfg = DetectionConfig {
            zscore_threshold: f64::NAN,
            ..Default::default()
        };
        assert_eq!(invalid_parameter(&cfg), "zscore_threshold");
    }

    #[test]
    fn behavioral_method_is_not_selectable() {
        let cfg = DetectionConfig {
            methods: vec![DetectionMethod::Zscore, DetectionMethod::LevelShift],
            ..Default::default()
        };
        assert_eq!(invalid_parameter(&cfg), "methods");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DetectionConfig =
            serde_json::from_str(r#"{"zscore_threshold": 3.0, "methods": ["iqr"]}"#).unwrap();
        assert_eq!(cfg.zscore_threshold, 3.0);
        assert_eq!(cfg.methods, vec![DetectionMethod::Iqr]);
        assert_eq!(cfg.moving_average_window, 7);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let parsed: std::result::Result<DetectionConfig, _> =
            serde_json::from_str(r#"{"zscore_treshold": 3.0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_method_list() {
        assert_eq!(
            parse_methods("zscore, moving_average").unwrap(),
            vec![DetectionMethod::Zscore, DetectionMethod::MovingAverage]
        );
        assert!(parse_methods("zscore,fraud_pattern").is_err());
    }

    #[test]
    fn profiled_env_override() {
        // Unique keys per test keep this independent of other env-reading tests.
        env::set_var("VIGILTEST_VIGIL_IQR_MULTIPLIER", "3.0");
        env::set_var("VIGILTEST_VIGIL_METHODS", "iqr,zscore");
        let cfg = DetectionConfig::default()
            .with_env_overrides("vigiltest")
            .unwrap();
        assert_eq!(cfg.iqr_multiplier, 3.0);
        assert_eq!(cfg.methods, vec![DetectionMethod::Iqr, DetectionMethod::Zscore]);
        env::remove_var("VIGILTEST_VIGIL_IQR_MULTIPLIER");
        env::remove_var("VIGILTEST_VIGIL_METHODS");
    }

    #[test]
    fn unparsable_env_value_is_an_error() {
        env::set_var("BADPROFILE_VIGIL_SEASONALITY_PERIOD", "daily");
        let err = DetectionConfig::default()
            .with_env_overrides("badprofile")
            .unwrap_err();
        env::remove_var("BADPROFILE_VIGIL_SEASONALITY_PERIOD");
        assert!(matches!(err, VigilError::InvalidParameter { ref parameter, .. } if parameter == "VIGIL_SEASONALITY_PERIOD"));
    }
}
