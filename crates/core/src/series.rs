use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

/// A named, ordered sequence of observations. Position is the time key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    pub values: Vec<f64>,
    /// Optional per-observation timestamps, carried into anomalies for context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<DateTime<Utc>>>,
}

impl MetricSeries {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
            timestamps: None,
        }
    }

    pub fn with_timestamps(mut self, timestamps: Vec<DateTime<Utc>>) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamp_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.as_ref().and_then(|ts| ts.get(index).copied())
    }

    /// Reject NaN/infinite observations and mismatched timestamp vectors.
    pub fn validate(&self) -> Result<()> {
        validate_values(&self.name, &self.values)?;
        if let Some(ts) = &self.timestamps {
            if ts.len() != self.values.len() {
                return Err(VigilError::invalid(
                    "timestamps",
                    format!(
                        "series `{}` has {} values but {} timestamps",
                        self.name,
                        self.values.len(),
                        ts.len()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Fail fast on the first value that is not a finite number.
pub fn validate_values(series: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(VigilError::NonFiniteValue {
            series: series.to_string(),
            index,
        }),
        None => Ok(()),
    }
}
