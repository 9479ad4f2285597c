//! Navigation, paint and resource timing read from the page's performance timeline.

use crate::attempt::Attempt;
use crate::cdp::Page;
use crate::error::{E2eError, Result};
use crate::monitor::types::PerformanceMetrics;
use serde::Deserialize;
use serde_json::Value;

const TIMING_SCRIPT: &str = r#"
(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    if (!nav) {
        return null;
    }
    const fcp = performance.getEntriesByType('paint')
        .find(e => e.name === 'first-contentful-paint');
    const resources = performance.getEntriesByType('resource');
    return {
        fetchStart: nav.fetchStart,
        domContentLoadedEventEnd: nav.domContentLoadedEventEnd,
        loadEventEnd: nav.loadEventEnd,
        requestStart: nav.requestStart,
        responseStart: nav.responseStart,
        firstContentfulPaint: fcp ? fcp.startTime : null,
        resourceCount: resources.length,
        transferSize: resources.reduce((sum, r) => sum + (r.transferSize || 0), 0)
    };
})()
"#;

// Buffered entries arrive synchronously on observe; 100ms bounds the wait for late ones.
const LCP_SCRIPT: &str = r#"
new Promise(resolve => {
    let value = null;
    const observer = new PerformanceObserver(list => {
        const entries = list.getEntries();
        value = entries[entries.length - 1].startTime;
    });
    observer.observe({ type: 'largest-contentful-paint', buffered: true });
    setTimeout(() => {
        observer.disconnect();
        resolve(value);
    }, 100);
})
"#;

/// Raw navigation timing as returned by the page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTiming {
    pub fetch_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub first_contentful_paint: Option<f64>,
    pub resource_count: u64,
    pub transfer_size: f64,
}

impl NavigationTiming {
    /// Durations are relative to `fetchStart`; the document counts as one request.
    ///
    /// Unfired events report 0 in the timeline. A missing load event falls back
    /// to DOMContentLoaded, and no duration goes below zero.
    pub fn to_metrics(&self, largest_contentful_paint: Option<f64>) -> PerformanceMetrics {
        let dom_content_loaded = self.since_fetch(self.dom_content_loaded_event_end);
        let load_complete = if self.load_event_end > 0.0 {
            self.since_fetch(self.load_event_end)
        } else {
            dom_content_loaded
        };
        PerformanceMetrics {
            navigation_start: self.fetch_start,
            dom_content_loaded,
            load_complete,
            time_to_first_byte: (self.response_start - self.request_start).max(0.0),
            first_contentful_paint: self.first_contentful_paint,
            largest_contentful_paint,
            total_requests: self.resource_count + 1,
            total_size: self.transfer_size.max(0.0) as u64,
            total_load_time: load_complete,
        }
    }

    fn since_fetch(&self, mark: f64) -> f64 {
        if mark > 0.0 {
            (mark - self.fetch_start).max(0.0)
        } else {
            0.0
        }
    }
}

async fn read_navigation_timing(page: &Page) -> Result<NavigationTiming> {
    match page.evaluate(TIMING_SCRIPT).await? {
        Value::Null => Err(E2eError::Evaluation(
            "Navigation timing data not available".to_string(),
        )),
        value => Ok(serde_json::from_value(value)?),
    }
}

async fn read_lcp(page: &Page) -> Option<f64> {
    page.evaluate(LCP_SCRIPT).await.ok().and_then(|v| v.as_f64())
}

/// Timing of the current document. Any read failure gives all-zero metrics.
pub async fn collect_performance_metrics(page: &Page) -> PerformanceMetrics {
    let timing = match Attempt::from_result(read_navigation_timing(page).await)
        .warn_skipped("Performance metrics")
    {
        Attempt::Done(timing) => timing,
        Attempt::Skipped(_) => return PerformanceMetrics::default(),
    };

    let lcp = read_lcp(page).await;
    timing.to_metrics(lcp)
}
