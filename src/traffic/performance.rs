//! Page-level request counters and navigation timing breakdown.
//!
//! Unlike the API recorder this keeps every request and response the page
//! sees, with no rules and no ignore list, so a test can ask "how heavy was
//! that load and did anything fail".

use crate::attempt::Attempt;
use crate::cdp::{CdpEvent, Page};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use super::http::response_status;

const BREAKDOWN_SCRIPT: &str = r#"
(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    if (!nav) {
        return null;
    }
    return {
        dns: nav.domainLookupEnd - nav.domainLookupStart,
        tcp: nav.connectEnd - nav.connectStart,
        request: nav.responseStart - nav.requestStart,
        response: nav.responseEnd - nav.responseStart,
        domParsing: nav.domInteractive - nav.responseEnd,
        domReady: nav.domContentLoadedEventEnd - nav.domContentLoadedEventStart,
        loadComplete: nav.loadEventEnd - nav.loadEventStart
    };
})()
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenRequest {
    pub url: String,
    pub method: String,
    /// Lower-cased CDP resource type (`document`, `script`, `fetch`, ...)
    pub resource_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenResponse {
    pub url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Value>,
}

impl SeenResponse {
    pub fn is_failed(&self) -> bool {
        self.status >= 400
    }

    pub fn is_successful(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Phase durations of the current document, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationBreakdown {
    pub dns: f64,
    pub tcp: f64,
    pub request: f64,
    pub response: f64,
    pub dom_parsing: f64,
    pub dom_ready: f64,
    pub load_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_requests: usize,
    pub total_responses: usize,
    pub failed_requests: usize,
    /// Wall time since monitoring started or was last reset
    pub load_time: u64,
    pub performance_metrics: Option<NavigationBreakdown>,
}

impl PerformanceReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "========== Performance Report ==========");
        let _ = writeln!(out, "Total requests: {}", self.total_requests);
        let _ = writeln!(out, "Total responses: {}", self.total_responses);
        let _ = writeln!(out, "Failed requests: {}", self.failed_requests);
        let _ = writeln!(out, "Page load time: {}ms", self.load_time);
        if let Some(m) = &self.performance_metrics {
            let _ = writeln!(out, "Navigation timing:");
            let _ = writeln!(out, "  DNS lookup: {:.2}ms", m.dns);
            let _ = writeln!(out, "  TCP connect: {:.2}ms", m.tcp);
            let _ = writeln!(out, "  Request: {:.2}ms", m.request);
            let _ = writeln!(out, "  Response: {:.2}ms", m.response);
            let _ = writeln!(out, "  DOM parsing: {:.2}ms", m.dom_parsing);
            let _ = writeln!(out, "  DOM ready: {:.2}ms", m.dom_ready);
            let _ = writeln!(out, "  Load complete: {:.2}ms", m.load_complete);
        }
        let _ = write!(out, "========================================");
        out
    }
}

/// Requests and responses in arrival order.
#[derive(Debug, Default)]
pub(crate) struct TrafficTally {
    requests: Vec<SeenRequest>,
    responses: Vec<SeenResponse>,
}

impl TrafficTally {
    pub fn apply(&mut self, event: &CdpEvent) {
        let params = &event.params;
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                // The redirect hop answered before the follow-up request went out.
                if let Some(redirect) = params.get("redirectResponse") {
                    self.responses.push(seen_response(redirect));
                }
                let Some(request) = params.get("request") else { return };
                let Some(url) = request.get("url").and_then(|u| u.as_str()) else { return };
                self.requests.push(SeenRequest {
                    url: url.to_string(),
                    method: request
                        .get("method")
                        .and_then(|m| m.as_str())
                        .unwrap_or("GET")
                        .to_string(),
                    resource_type: params
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("other")
                        .to_ascii_lowercase(),
                });
            }
            "Network.responseReceived" => {
                if let Some(response) = params.get("response") {
                    self.responses.push(seen_response(response));
                }
            }
            _ => {}
        }
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.responses.clear();
    }

    pub fn requests(&self) -> &[SeenRequest] {
        &self.requests
    }

    pub fn responses(&self) -> &[SeenResponse] {
        &self.responses
    }

    pub fn failed(&self) -> Vec<SeenResponse> {
        self.responses.iter().filter(|r| r.is_failed()).cloned().collect()
    }

    pub fn successful(&self) -> Vec<SeenResponse> {
        self.responses
            .iter()
            .filter(|r| r.is_successful())
            .cloned()
            .collect()
    }

    pub fn by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for request in &self.requests {
            *counts.entry(request.resource_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn by_status(&self) -> BTreeMap<u16, usize> {
        let mut counts = BTreeMap::new();
        for response in &self.responses {
            *counts.entry(response.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn urls_of_type(&self, resource_type: &str) -> Vec<String> {
        self.requests
            .iter()
            .filter(|r| r.resource_type == resource_type)
            .map(|r| r.url.clone())
            .collect()
    }

    /// Substring match on the whole URL, so `"cdn"` also hits paths.
    pub fn urls_containing(&self, domain: &str) -> Vec<String> {
        self.requests
            .iter()
            .filter(|r| r.url.contains(domain))
            .map(|r| r.url.clone())
            .collect()
    }
}

fn seen_response(response: &Value) -> SeenResponse {
    SeenResponse {
        url: response
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string(),
        status: response_status(response),
        timing: response.get("timing").filter(|t| !t.is_null()).cloned(),
    }
}

struct MonitorState {
    tally: TrafficTally,
    started: Instant,
}

/// Counts every request and response of one page and reads its navigation timing.
pub struct PerformanceMonitor {
    page: Page,
    state: Arc<parking_lot::Mutex<MonitorState>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            state: Arc::new(parking_lot::Mutex::new(MonitorState {
                tally: TrafficTally::default(),
                started: Instant::now(),
            })),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Reset the counters and start listening. A running listener is replaced.
    pub async fn start_monitoring(&self) -> Result<()> {
        self.reset();

        let mut events = self.page.events();
        self.page.send("Network.enable", json!({})).await?;

        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                state.lock().tally.apply(&event);
            }
            tracing::debug!("Performance monitor event stream ended");
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        tracing::info!("Performance monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tally.clear();
        state.started = Instant::now();
    }

    /// Counters so far plus the navigation breakdown, which is `None` when the
    /// page has no navigation entry or cannot be evaluated.
    pub async fn get_report(&self) -> PerformanceReport {
        let breakdown = match Attempt::from_result(read_breakdown(&self.page).await)
            .warn_skipped("Navigation timing")
        {
            Attempt::Done(breakdown) => breakdown,
            Attempt::Skipped(_) => None,
        };

        let state = self.state.lock();
        PerformanceReport {
            total_requests: state.tally.requests().len(),
            total_responses: state.tally.responses().len(),
            failed_requests: state.tally.responses().iter().filter(|r| r.is_failed()).count(),
            load_time: state.started.elapsed().as_millis() as u64,
            performance_metrics: breakdown,
        }
    }

    pub async fn log_report(&self) {
        for line in self.get_report().await.render().lines() {
            tracing::info!("{}", line);
        }
    }

    pub fn get_failed_requests(&self) -> Vec<SeenResponse> {
        self.state.lock().tally.failed()
    }

    pub fn get_successful_requests(&self) -> Vec<SeenResponse> {
        self.state.lock().tally.successful()
    }

    pub fn get_requests_by_type(&self) -> BTreeMap<String, usize> {
        self.state.lock().tally.by_type()
    }

    pub fn get_responses_by_status(&self) -> BTreeMap<u16, usize> {
        self.state.lock().tally.by_status()
    }

    pub fn get_all_requests(&self) -> Vec<SeenRequest> {
        self.state.lock().tally.requests().to_vec()
    }

    pub fn get_all_responses(&self) -> Vec<SeenResponse> {
        self.state.lock().tally.responses().to_vec()
    }

    pub fn get_requests_by_resource_type(&self, resource_type: &str) -> Vec<String> {
        self.state.lock().tally.urls_of_type(resource_type)
    }

    pub fn get_requests_by_domain(&self, domain: &str) -> Vec<String> {
        self.state.lock().tally.urls_containing(domain)
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_breakdown(page: &Page) -> Result<Option<NavigationBreakdown>> {
    match page.evaluate(BREAKDOWN_SCRIPT).await? {
        Value::Null => Ok(None),
        value => Ok(Some(serde_json::from_value(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
            session_id: Some("S".to_string()),
        }
    }

    fn request(id: &str, url: &str, kind: &str) -> CdpEvent {
        event(
            "Network.requestWillBeSent",
            json!({ "requestId": id, "type": kind, "request": { "url": url, "method": "GET" } }),
        )
    }

    fn response(id: &str, url: &str, status: u16) -> CdpEvent {
        event(
            "Network.responseReceived",
            json!({ "requestId": id, "response": { "url": url, "status": status, "timing": { "sendStart": 1.0 } } }),
        )
    }

    fn tally_of_page_load() -> TrafficTally {
        let mut tally = TrafficTally::default();
        for e in [
            request("1", "https://h.test/traffic", "Document"),
            response("1", "https://h.test/traffic", 200),
            request("2", "https://h.test/api/foo", "Fetch"),
            request("3", "https://h.test/api/fail", "Fetch"),
            request("4", "https://cdn.test/app.js", "Script"),
            response("2", "https://h.test/api/foo", 200),
            response("3", "https://h.test/api/fail", 500),
            event("Network.loadingFinished", json!({ "requestId": "2" })),
        ] {
            tally.apply(&e);
        }
        tally
    }

    #[test]
    fn test_tally_groups_and_filters() {
        let tally = tally_of_page_load();
        assert_eq!(tally.requests().len(), 4);
        assert_eq!(tally.responses().len(), 3);

        let failed = tally.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].url, "https://h.test/api/fail");
        assert_eq!(tally.successful().len(), 2);

        assert_eq!(tally.by_type().get("fetch"), Some(&2));
        assert_eq!(tally.by_type().get("document"), Some(&1));
        assert_eq!(tally.by_status().get(&500), Some(&1));
        assert_eq!(tally.by_status().get(&200), Some(&2));

        assert_eq!(tally.urls_of_type("script"), vec!["https://cdn.test/app.js"]);
        assert_eq!(tally.urls_containing("h.test").len(), 3);
        assert!(tally.responses()[0].timing.is_some());
    }

    #[test]
    fn test_redirect_hop_counts_as_response() {
        let mut tally = TrafficTally::default();
        tally.apply(&request("1", "https://h.test/old", "Document"));
        tally.apply(&event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "1",
                "type": "Document",
                "redirectResponse": { "url": "https://h.test/old", "status": 302 },
                "request": { "url": "https://h.test/new", "method": "GET" }
            }),
        ));
        assert_eq!(tally.requests().len(), 2);
        assert_eq!(tally.by_status().get(&302), Some(&1));
        assert!(tally.failed().is_empty());
        assert_eq!(tally.successful().len(), 1);

        tally.clear();
        assert!(tally.requests().is_empty() && tally.responses().is_empty());
    }

    #[test]
    fn test_report_rendering() {
        let report = PerformanceReport {
            total_requests: 4,
            total_responses: 3,
            failed_requests: 1,
            load_time: 812,
            performance_metrics: Some(NavigationBreakdown {
                dns: 0.0,
                tcp: 1.5,
                request: 12.25,
                response: 3.0,
                dom_parsing: 40.0,
                dom_ready: 0.3,
                load_complete: 0.1,
            }),
        };
        let text = report.render();
        assert!(text.contains("Failed requests: 1"));
        assert!(text.contains("Page load time: 812ms"));
        assert!(text.contains("Request: 12.25ms"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["performanceMetrics"]["domParsing"], 40.0);
        assert_eq!(value["loadTime"], 812);

        let bare = PerformanceReport {
            performance_metrics: None,
            ..report
        };
        assert!(!bare.render().contains("DNS lookup"));
    }
}
