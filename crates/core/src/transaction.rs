use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Failed,
}

/// A single money movement between two accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl TransactionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TransactionStatus::Failed
    }

    /// Check the fields serde cannot enforce on its own.
    pub fn validate(&self) -> Result<()> {
        let malformed = |reason: &str| VigilError::MalformedRecord {
            reference: self.reference(),
            reason: reason.to_string(),
        };
        if self.transaction_id.trim().is_empty() {
            return Err(malformed("empty transaction_id"));
        }
        if self.from_account.trim().is_empty() {
            return Err(malformed("empty from_account"));
        }
        if self.to_account.trim().is_empty() {
            return Err(malformed("empty to_account"));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(malformed(&format!("non-positive amount {}", self.amount)));
        }
        Ok(())
    }

    fn reference(&self) -> String {
        if self.transaction_id.trim().is_empty() {
            "<missing id>".to_string()
        } else {
            self.transaction_id.clone()
        }
    }
}

/// A record that was refused before detection, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// `transaction_id` when one could be read, otherwise `#<position>`.
    pub reference: String,
    pub reason: String,
}

impl From<VigilError> for RejectedRecord {
    fn from(err: VigilError) -> Self {
        match err {
            VigilError::MalformedRecord { reference, reason } => Self { reference, reason },
            other => Self {
                reference: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Split typed records into valid ones and rejections.
pub fn partition_valid(records: &[TransactionRecord]) -> (Vec<TransactionRecord>, Vec<RejectedRecord>) {
    let mut valid = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        match record.validate() {
            Ok(()) => valid.push(record.clone()),
            Err(e) => rejected.push(e.into()),
        }
    }
    (valid, rejected)
}

/// Decode loosely-typed JSON records (e.g. from an upstream log parser).
///
/// Records with missing or mistyped fields are reported, never dropped silently.
pub fn parse_transaction_batch(
    raw: Vec<serde_json::Value>,
) -> (Vec<TransactionRecord>, Vec<RejectedRecord>) {
    let mut valid = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (position, value) in raw.into_iter().enumerate() {
        let reference = value
            .get("transaction_id")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("#{}", position));

        let record: TransactionRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                rejected.push(RejectedRecord {
                    reference,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match record.validate() {
            Ok(()) => valid.push(record),
            Err(e) => rejected.push(e.into()),
        }
    }

    (valid, rejected)
}
