//! Records written by the site monitor. All serialize as camelCase JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub navigation_start: f64,
    pub dom_content_loaded: f64,
    pub load_complete: f64,
    pub time_to_first_byte: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_contentful_paint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub largest_contentful_paint: Option<f64>,
    /// Resource entries plus the document itself
    pub total_requests: u64,
    /// Sum of transfer sizes in bytes
    pub total_size: u64,
    pub total_load_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedResource {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesByType {
    pub image: u32,
    pub stylesheet: u32,
    pub script: u32,
    pub font: u32,
    pub xhr: u32,
    pub other: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCheckResult {
    pub total_resources: usize,
    pub failed_resources: Vec<FailedResource>,
    pub resources_by_type: ResourcesByType,
    pub all_resources_loaded: bool,
}

impl Default for ResourceCheckResult {
    fn default() -> Self {
        Self {
            total_resources: 0,
            failed_resources: Vec::new(),
            resources_by_type: ResourcesByType::default(),
            all_resources_loaded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Success,
    Failed,
}

/// Coarse cause of a failed check, derived from the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Navigation,
    Timeout,
    Ssl,
    Unknown,
}

impl ErrorType {
    /// Checked in order: navigation, timeout, ssl.
    pub fn classify(message: &str) -> Self {
        if message.contains("Navigation") || message.contains("net::") {
            Self::Navigation
        } else if message.contains("Timeout") {
            Self::Timeout
        } else if message.contains("SSL") || message.contains("certificate") {
            Self::Ssl
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub url: String,
    /// RFC 3339 start time
    pub timestamp: String,
    /// `HHmmss`, used in file names
    pub detection_time: String,
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_check: Option<ResourceCheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

impl DetectionResult {
    pub fn is_success(&self) -> bool {
        self.status == DetectionStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultSummary {
    pub url: String,
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub detail_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatsSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_load_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slowest_url: Option<String>,
    #[serde(default)]
    pub total_resources_checked: usize,
    #[serde(default)]
    pub total_failed_resources: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub timestamp: String,
    pub total_urls: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// Milliseconds between the first and the last check's start
    pub total_detection_time: i64,
    pub results: Vec<BatchResultSummary>,
    pub summary: BatchStatsSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Single,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionIndexItem {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: IndexKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyIndex {
    pub date: String,
    pub detections: Vec<DetectionIndexItem>,
}
