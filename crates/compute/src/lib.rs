pub mod behavior;
pub mod contextual;
pub mod detectors;
pub mod engine;
pub mod severity;
pub mod stats;

pub use behavior::{BehaviorAnalyzer, ChangeDirection, ChangePoint};
pub use contextual::{ContextualDetector, TransactionReport};
pub use detectors::{Finding, StatisticalDetector};
pub use engine::{AnomalyDetectionEngine, DetectionReport, TRANSACTIONS_KEY};
pub use severity::CONCURRENCE_UPGRADE_METHODS;
