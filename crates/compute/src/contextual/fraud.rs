//! Fraud-pattern checks over chronologically sorted transactions.
//!
//! Every check groups records per account (`BTreeMap` so output order is
//! stable) and reports at most one anomaly per account and pattern.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;
use serde_json::json;
use tracing::debug;

use vigil_core::{Anomaly, DetectionMethod, RecordRef, Severity, TransactionRecord};

use super::seconds_between;
use crate::detectors::context;

pub const FREQUENCY_METRIC: &str = "transaction_frequency";
pub const FAILURE_METRIC: &str = "transaction_failures";
pub const COUNTERPARTY_METRIC: &str = "transaction_counterparties";

fn group_by<'a>(
    sorted: &[&'a TransactionRecord],
    key: impl Fn(&'a TransactionRecord) -> &'a str,
) -> BTreeMap<&'a str, Vec<&'a TransactionRecord>> {
    let mut groups: BTreeMap<&str, Vec<&TransactionRecord>> = BTreeMap::new();
    for txn in sorted {
        groups.entry(key(*txn)).or_default().push(*txn);
    }
    groups
}

fn ids(txns: &[&TransactionRecord]) -> Vec<String> {
    txns.iter().map(|t| t.transaction_id.clone()).collect()
}

// ── Rapid consecutive transfers ─────────────────────────────────

/// Chains of transfers from one sender where each gap is shorter than
/// `rapid_window` and the whole chain fits inside `horizon`.
///
/// A chain of `min_count` or more transfers is a single critical anomaly
/// attached to its last transaction, listing every member.
pub fn detect_rapid_transfers(
    sorted: &[&TransactionRecord],
    rapid_window: Duration,
    min_count: usize,
    horizon: Duration,
) -> Vec<Anomaly> {
    let window_secs = rapid_window.num_milliseconds() as f64 / 1000.0;
    let horizon_secs = horizon.num_milliseconds() as f64 / 1000.0;
    let mut anomalies = Vec::new();

    for (account, txns) in group_by(sorted, |t| t.from_account.as_str()) {
        let mut chain: Vec<&TransactionRecord> = Vec::new();
        for txn in txns {
            let extends = match (chain.first(), chain.last()) {
                (Some(first), Some(last)) => {
                    seconds_between(last, txn) < window_secs
                        && seconds_between(first, txn) <= horizon_secs
                }
                _ => false,
            };
            if !extends {
                if let Some(a) = rapid_chain_anomaly(account, &chain, min_count, window_secs) {
                    anomalies.push(a);
                }
                chain.clear();
            }
            chain.push(txn);
        }
        if let Some(a) = rapid_chain_anomaly(account, &chain, min_count, window_secs) {
            anomalies.push(a);
        }
    }

    debug!(found = anomalies.len(), "rapid transfer check complete");
    anomalies
}

fn rapid_chain_anomaly(
    account: &str,
    chain: &[&TransactionRecord],
    min_count: usize,
    window_secs: f64,
) -> Option<Anomaly> {
    if chain.len() < min_count.max(2) {
        return None;
    }
    let first = chain.first()?;
    let last = chain.last()?;
    let gaps: Vec<f64> = chain.windows(2).map(|w| seconds_between(w[0], w[1])).collect();
    let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let span = seconds_between(first, last);

    Some(Anomaly {
        metric_name: FREQUENCY_METRIC.to_string(),
        record_ref: RecordRef::Transaction(last.transaction_id.clone()),
        observed_value: mean_gap,
        expected_value: Some(window_secs),
        method: DetectionMethod::FraudPattern,
        severity: Severity::Critical,
        description: format!(
            "Rapid consecutive transactions: {} transfers from {} within {:.0}s",
            chain.len(),
            account,
            span
        ),
        timestamp: Some(last.timestamp),
        context: context([
            ("account_id", json!(account)),
            ("pattern", json!("rapid_transfers")),
            ("transaction_ids", json!(ids(chain))),
            ("gaps_seconds", json!(gaps)),
            ("span_seconds", json!(span)),
        ]),
    })
}

// ── Repeated failures ───────────────────────────────────────────

/// Senders with at least `min_failures` failed attempts making up at least
/// `min_rate` of their transactions inside some `horizon`-long window.
///
/// The window with the most failures is reported (earliest on ties).
pub fn detect_repeated_failures(
    sorted: &[&TransactionRecord],
    horizon: Duration,
    min_failures: usize,
    min_rate: f64,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (account, txns) in group_by(sorted, |t| t.from_account.as_str()) {
        let mut best: Option<(usize, usize, usize)> = None;
        let mut start = 0;
        let mut failures = 0;

        for end in 0..txns.len() {
            if txns[end].is_failed() {
                failures += 1;
            }
            while txns[end].timestamp - txns[start].timestamp > horizon {
                if txns[start].is_failed() {
                    failures -= 1;
                }
                start += 1;
            }
            let total = end - start + 1;
            let rate = failures as f64 / total as f64;
            if failures >= min_failures
                && rate >= min_rate
                && best.map_or(true, |(f, _, _)| failures > f)
            {
                best = Some((failures, start, end));
            }
        }

        let Some((failure_count, start, end)) = best else {
            continue;
        };
        let window = &txns[start..=end];
        let failed: Vec<&TransactionRecord> =
            window.iter().copied().filter(|t| t.is_failed()).collect();
        let Some(last_failed) = failed.last() else {
            continue;
        };
        let rate = failure_count as f64 / window.len() as f64;

        anomalies.push(Anomaly {
            metric_name: FAILURE_METRIC.to_string(),
            record_ref: RecordRef::Transaction(last_failed.transaction_id.clone()),
            observed_value: rate,
            expected_value: Some(min_rate),
            method: DetectionMethod::RepeatedFailures,
            severity: Severity::High,
            description: format!(
                "Repeated failed transactions: {} of {} attempts from {} failed",
                failure_count,
                window.len(),
                account
            ),
            timestamp: Some(last_failed.timestamp),
            context: context([
                ("account_id", json!(account)),
                ("failure_count", json!(failure_count)),
                ("window_total", json!(window.len())),
                ("failed_transaction_ids", json!(ids(&failed))),
            ]),
        });
    }

    debug!(found = anomalies.len(), "repeated failure check complete");
    anomalies
}

// ── Cross-account fan-out / fan-in ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FanPattern {
    Out,
    In,
}

impl FanPattern {
    fn as_str(self) -> &'static str {
        match self {
            FanPattern::Out => "fan_out",
            FanPattern::In => "fan_in",
        }
    }
}

/// Accounts that send to (fan-out) or receive from (fan-in) at least
/// `min_counterparties` distinct accounts within `horizon`.
pub fn detect_cross_account(
    sorted: &[&TransactionRecord],
    horizon: Duration,
    min_counterparties: usize,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (account, txns) in group_by(sorted, |t| t.from_account.as_str()) {
        if let Some(a) = fan_anomaly(account, &txns, FanPattern::Out, horizon, min_counterparties) {
            anomalies.push(a);
        }
    }
    for (account, txns) in group_by(sorted, |t| t.to_account.as_str()) {
        if let Some(a) = fan_anomaly(account, &txns, FanPattern::In, horizon, min_counterparties) {
            anomalies.push(a);
        }
    }

    debug!(found = anomalies.len(), "cross-account check complete");
    anomalies
}

fn fan_anomaly(
    account: &str,
    txns: &[&TransactionRecord],
    pattern: FanPattern,
    horizon: Duration,
    min_counterparties: usize,
) -> Option<Anomaly> {
    let counterparty = |t: &TransactionRecord| -> String {
        match pattern {
            FanPattern::Out => t.to_account.clone(),
            FanPattern::In => t.from_account.clone(),
        }
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut best: Option<(usize, usize, usize)> = None;
    let mut start = 0;

    for end in 0..txns.len() {
        *seen.entry(counterparty(txns[end])).or_default() += 1;
        while txns[end].timestamp - txns[start].timestamp > horizon {
            let key = counterparty(txns[start]);
            if let Some(count) = seen.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    seen.remove(&key);
                }
            }
            start += 1;
        }
        let distinct = seen.len();
        if distinct >= min_counterparties && best.map_or(true, |(d, _, _)| distinct > d) {
            best = Some((distinct, start, end));
        }
    }

    let (distinct, start, end) = best?;
    let window = &txns[start..=end];
    let counterparties: BTreeSet<String> = window.iter().map(|t| counterparty(*t)).collect();
    let last = window.last()?;
    let span = seconds_between(window.first()?, last);
    let verb = match pattern {
        FanPattern::Out => "sent to",
        FanPattern::In => "received from",
    };

    Some(Anomaly {
        metric_name: COUNTERPARTY_METRIC.to_string(),
        record_ref: RecordRef::Transaction(last.transaction_id.clone()),
        observed_value: distinct as f64,
        expected_value: Some(min_counterparties as f64),
        method: DetectionMethod::CrossAccount,
        severity: Severity::High,
        description: format!(
            "Cross-account {}: {} {} {} distinct accounts within {:.0}s",
            pattern.as_str().replace('_', "-"),
            account,
            verb,
            distinct,
            span
        ),
        timestamp: Some(last.timestamp),
        context: context([
            ("account_id", json!(account)),
            ("pattern", json!(pattern.as_str())),
            ("counterparties", json!(counterparties)),
            ("transaction_ids", json!(ids(window))),
        ]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contextual::sort_chronologically;
    use crate::contextual::test_support::*;

    fn minute() -> Duration {
        Duration::seconds(60)
    }

    fn hour() -> Duration {
        Duration::seconds(3_600)
    }

    #[test]
    fn rapid_chain_requires_every_gap_below_window() {
        let records = vec![
            txn("T1", "A", "B", 5.0, 0),
            txn("T2", "A", "B", 5.0, 30),
            txn("T3", "A", "B", 5.0, 90), // 60s gap is not rapid
            txn("T4", "A", "B", 5.0, 100),
        ];
        let found = detect_rapid_transfers(&sort_chronologically(&records), minute(), 3, hour());
        assert!(found.is_empty());
    }

    #[test]
    fn long_chain_is_reported_once() {
        let records: Vec<_> = (0..8)
            .map(|i| txn(&format!("T{}", i), "A", "B", 5.0, i * 20))
            .collect();
        let found = detect_rapid_transfers(&sort_chronologically(&records), minute(), 3, hour());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_ref.transaction_id(), Some("T7"));
        assert_eq!(found[0].context["gaps_seconds"].as_array().unwrap().len(), 7);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[test]
    fn chains_of_different_senders_are_separate() {
        let records = vec![
            txn("A1", "A", "X", 5.0, 0),
            txn("B1", "B", "X", 5.0, 5),
            txn("A2", "A", "X", 5.0, 10),
            txn("B2", "B", "X", 5.0, 15),
            txn("A3", "A", "X", 5.0, 20),
        ];
        let found = detect_rapid_transfers(&sort_chronologically(&records), minute(), 3, hour());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context["account_id"], json!("A"));
    }

    #[test]
    fn horizon_splits_a_chain() {
        let records: Vec<_> = (0..6)
            .map(|i| txn(&format!("T{}", i), "A", "B", 5.0, i * 50))
            .collect();
        // 120s horizon: T0..T2 fit (span 100), T3 starts a new chain.
        let found = detect_rapid_transfers(
            &sort_chronologically(&records),
            minute(),
            3,
            Duration::seconds(120),
        );
        let chains: Vec<_> = found
            .iter()
            .map(|a| a.context["transaction_ids"].clone())
            .collect();
        assert_eq!(chains, vec![json!(["T0", "T1", "T2"]), json!(["T3", "T4", "T5"])]);
    }

    #[test]
    fn repeated_failures_pick_the_worst_window() {
        let records = vec![
            failed("F1", "A", "B", 5.0, 0),
            failed("F2", "A", "B", 5.0, 100),
            txn("C1", "A", "B", 5.0, 200),
            failed("F3", "A", "B", 5.0, 300),
            failed("F4", "A", "B", 5.0, 400),
        ];
        let found = detect_repeated_failures(&sort_chronologically(&records), hour(), 3, 0.5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_ref.transaction_id(), Some("F4"));
        assert_eq!(found[0].context["failure_count"], json!(4));
        assert!((found[0].observed_value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn failures_diluted_by_successes_are_ignored() {
        let mut records: Vec<_> = (0..7)
            .map(|i| txn(&format!("C{}", i), "A", "B", 5.0, i * 10))
            .collect();
        records.extend((0..3).map(|i| failed(&format!("F{}", i), "A", "B", 5.0, 100 + i * 10)));
        let found = detect_repeated_failures(&sort_chronologically(&records), hour(), 3, 0.5);
        assert!(found.is_empty());
    }

    #[test]
    fn failures_spread_beyond_horizon_are_ignored() {
        let records: Vec<_> = (0..4)
            .map(|i| failed(&format!("F{}", i), "A", "B", 5.0, i * 4_000))
            .collect();
        assert!(detect_repeated_failures(&sort_chronologically(&records), hour(), 3, 0.5).is_empty());
    }

    #[test]
    fn fan_out_to_many_recipients() {
        let records: Vec<_> = (0..5)
            .map(|i| txn(&format!("T{}", i), "MULE", &format!("R{}", i), 5.0, i * 300))
            .collect();
        let found = detect_cross_account(&sort_chronologically(&records), hour(), 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context["pattern"], json!("fan_out"));
        assert_eq!(found[0].observed_value, 5.0);
        assert_eq!(found[0].record_ref.transaction_id(), Some("T4"));
    }

    #[test]
    fn fan_in_from_many_senders() {
        let records: Vec<_> = (0..6)
            .map(|i| txn(&format!("T{}", i), &format!("S{}", i), "SINK", 5.0, i * 60))
            .collect();
        let found = detect_cross_account(&sort_chronologically(&records), hour(), 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context["pattern"], json!("fan_in"));
        assert_eq!(found[0].context["account_id"], json!("SINK"));
        assert_eq!(found[0].observed_value, 6.0);
    }

    #[test]
    fn repeat_recipient_counts_once() {
        let records: Vec<_> = (0..10)
            .map(|i| txn(&format!("T{}", i), "A", &format!("R{}", i % 2), 5.0, i * 60))
            .collect();
        assert!(detect_cross_account(&sort_chronologically(&records), hour(), 5).is_empty());
    }
}
