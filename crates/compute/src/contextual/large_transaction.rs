//! Amounts that sit far above what the sender normally moves.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use vigil_core::{Anomaly, DetectionMethod, RecordRef, Severity, TransactionRecord};

use crate::stats;

pub const METRIC_NAME: &str = "transaction_amount";

#[derive(Debug, Clone, Copy, PartialEq)]
enum BaselineScope {
    Account,
    Global,
}

impl BaselineScope {
    fn as_str(self) -> &'static str {
        match self {
            BaselineScope::Account => "account",
            BaselineScope::Global => "global",
        }
    }
}

/// Relative margin over the mean that counts as large when a sender's
/// history has no spread at all (every earlier amount identical).
pub const FLAT_HISTORY_TOLERANCE: f64 = 0.5;

/// Mean and stddev of a baseline, `std == 0` meaning a flat history.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    mean: f64,
    std: f64,
    scope: BaselineScope,
}

impl Baseline {
    /// Amount above which a transaction is flagged.
    fn threshold(&self, k: f64) -> f64 {
        if self.std > f64::EPSILON {
            self.mean + k * self.std
        } else {
            self.mean * (1.0 + FLAT_HISTORY_TOLERANCE)
        }
    }
}

/// Running sums over every completed amount in the batch, so the global
/// baseline for a candidate can leave the candidate itself out.
struct GlobalSums {
    n: usize,
    sum: f64,
    sum_sq: f64,
}

impl GlobalSums {
    fn new(sorted: &[&TransactionRecord]) -> Self {
        let mut sums = Self { n: 0, sum: 0.0, sum_sq: 0.0 };
        for t in sorted.iter().filter(|t| t.is_completed()) {
            sums.n += 1;
            sums.sum += t.amount;
            sums.sum_sq += t.amount * t.amount;
        }
        sums
    }

    /// Sample mean/stddev of all completed amounts except `txn`. `None`
    /// when fewer than two remain or they have no spread.
    fn excluding(&self, txn: &TransactionRecord) -> Option<Baseline> {
        let (n, sum, sum_sq) = if txn.is_completed() {
            (self.n.saturating_sub(1), self.sum - txn.amount, self.sum_sq - txn.amount * txn.amount)
        } else {
            (self.n, self.sum, self.sum_sq)
        };
        if n < 2 {
            return None;
        }
        let mean = sum / n as f64;
        let variance = ((sum_sq - sum * mean) / (n - 1) as f64).max(0.0);
        let std = variance.sqrt();
        (std > f64::EPSILON * mean.abs().max(1.0)).then_some(Baseline {
            mean,
            std,
            scope: BaselineScope::Global,
        })
    }
}

/// Flag transactions whose amount exceeds `mean + k·σ` of a baseline.
///
/// The baseline is the sender's earlier completed, unflagged transactions
/// once there are `min_history` of them. A flat history (σ = 0) flags any
/// amount more than [`FLAT_HISTORY_TOLERANCE`] above its mean. Senders with
/// a shorter history are judged against every other completed amount in the
/// batch. A flagged amount never enters its sender's history.
///
/// `sorted` must already be in chronological order.
pub fn detect_large_transactions(
    sorted: &[&TransactionRecord],
    k: f64,
    min_history: usize,
) -> Vec<Anomaly> {
    let global = GlobalSums::new(sorted);
    let mut history: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut anomalies = Vec::new();

    for txn in sorted {
        let own = history.get(txn.from_account.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let baseline = account_baseline(own, min_history).or_else(|| global.excluding(txn));

        let mut flagged = false;
        if let Some(baseline) = baseline {
            if txn.amount > baseline.threshold(k) {
                flagged = true;
                anomalies.push(build_anomaly(txn, baseline, k));
            }
        }

        if txn.is_completed() && !flagged {
            history
                .entry(txn.from_account.as_str())
                .or_default()
                .push(txn.amount);
        }
    }

    anomalies
}

fn account_baseline(history: &[f64], min_history: usize) -> Option<Baseline> {
    if history.is_empty() || history.len() < min_history {
        return None;
    }
    let (mean, std) = stats::mean_std(history);
    Some(Baseline {
        mean,
        std,
        scope: BaselineScope::Account,
    })
}

fn build_anomaly(txn: &TransactionRecord, baseline: Baseline, k: f64) -> Anomaly {
    let Baseline { mean, std, scope } = baseline;
    let z = (std > f64::EPSILON).then(|| (txn.amount - mean) / std);
    // Flat histories have no z-score; k times the usual amount is the critical mark.
    let severity = match z {
        Some(z) if z >= 2.0 * k => Severity::Critical,
        None if txn.amount >= k * mean => Severity::Critical,
        _ => Severity::High,
    };
    let context: BTreeMap<String, Value> = BTreeMap::from([
        ("account_id".to_string(), json!(txn.from_account)),
        ("baseline".to_string(), json!(scope.as_str())),
        ("baseline_std_dev".to_string(), json!(std)),
        ("z_score".to_string(), json!(z)),
        ("to_account".to_string(), json!(txn.to_account)),
    ]);
    let description = match z {
        Some(z) => format!(
            "Unusually large transaction: {:.2} from {} is {:.2} standard deviations above the {} baseline of {:.2}",
            txn.amount,
            txn.from_account,
            z,
            scope.as_str(),
            mean
        ),
        None => format!(
            "Unusually large transaction: {:.2} from {} against a constant {} baseline of {:.2}",
            txn.amount,
            txn.from_account,
            scope.as_str(),
            mean
        ),
    };

    Anomaly {
        metric_name: METRIC_NAME.to_string(),
        record_ref: RecordRef::Transaction(txn.transaction_id.clone()),
        observed_value: txn.amount,
        expected_value: Some(mean),
        method: DetectionMethod::LargeTransaction,
        severity,
        description,
        timestamp: Some(txn.timestamp),
        context,
    }
}
