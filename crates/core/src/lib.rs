pub mod anomaly;
pub mod config;
pub mod error;
pub mod series;
pub mod transaction;

pub use anomaly::*;
pub use config::DetectionConfig;
pub use error::*;
pub use series::MetricSeries;
pub use transaction::*;
