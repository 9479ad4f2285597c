use crate::attempt::Attempt;
use crate::cdp::Page;
use crate::monitor::types::{FailedResource, ResourceCheckResult, ResourcesByType};
use serde::Deserialize;

const BLOCKED_MESSAGE: &str = "Resource failed to load or was blocked";

const RESOURCE_ENTRIES_SCRIPT: &str = r#"
JSON.stringify(performance.getEntriesByType('resource').map(e => ({
    name: e.name,
    initiatorType: e.initiatorType || 'other',
    transferSize: e.transferSize || 0,
    duration: e.duration || 0
})))
"#;

/// One `PerformanceResourceTiming` entry, reduced to what the check needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    pub name: String,
    pub initiator_type: String,
    pub transfer_size: f64,
    pub duration: f64,
}

impl ResourcesByType {
    fn count(&mut self, initiator_type: &str) {
        match initiator_type.to_lowercase().as_str() {
            "img" | "image" => self.image += 1,
            "css" | "link" => self.stylesheet += 1,
            "script" => self.script += 1,
            "font" => self.font += 1,
            "xmlhttprequest" | "fetch" => self.xhr += 1,
            _ => self.other += 1,
        }
    }
}

/// Bucket entries by initiator and flag those with neither bytes nor time.
///
/// Cached and cross-origin entries without timing headers also report zero
/// for both, so the flag is a hint rather than proof of failure.
pub fn summarize_resources(entries: &[ResourceEntry]) -> ResourceCheckResult {
    let mut by_type = ResourcesByType::default();
    let mut failed = Vec::new();

    for entry in entries {
        by_type.count(&entry.initiator_type);
        if entry.transfer_size == 0.0 && entry.duration == 0.0 {
            failed.push(FailedResource {
                url: entry.name.clone(),
                kind: entry.initiator_type.clone(),
                status: None,
                error_message: Some(BLOCKED_MESSAGE.to_string()),
            });
        }
    }

    ResourceCheckResult {
        total_resources: entries.len(),
        all_resources_loaded: failed.is_empty(),
        failed_resources: failed,
        resources_by_type: by_type,
    }
}

async fn read_entries(page: &Page) -> crate::error::Result<Vec<ResourceEntry>> {
    let raw = page.evaluate(RESOURCE_ENTRIES_SCRIPT).await?;
    let json = raw.as_str().unwrap_or("[]");
    Ok(serde_json::from_str(json)?)
}

/// Resource completeness of the current document. Read errors give an empty, passing result.
pub async fn check_resources(page: &Page) -> ResourceCheckResult {
    Attempt::from_result(read_entries(page).await)
        .warn_skipped("Resource check")
        .map(|entries| summarize_resources(&entries))
        .unwrap_or_default()
}
