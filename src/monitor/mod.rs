//! Site monitor: timed checks of arbitrary URLs with persisted records.

pub mod config;
pub mod detector;
pub mod interactive;
pub mod performance;
pub mod report;
pub mod resources;
pub mod screenshot;
pub mod types;

pub use config::{load_monitor_config, MonitorConfig};
pub use detector::{detect_batch, Detector};
pub use report::ReportWriter;
pub use types::{BatchSummary, DetectionResult, DetectionStatus, ErrorType};
