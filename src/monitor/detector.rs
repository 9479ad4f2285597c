//! One site check: navigate, time, check resources, screenshot.
//!
//! Checks never fail as a whole. Anything that goes wrong before the resource
//! check ends up as a `failed` [`DetectionResult`] with a classified error type.

use crate::attempt::Attempt;
use crate::cdp::{Browser, BrowserContext, GotoOptions, LaunchOptions, LoadState, Page, WaitUntil};
use crate::config::schema::HarnessConfig;
use crate::error::Result;
use crate::monitor::config::MonitorConfig;
use crate::monitor::performance::collect_performance_metrics;
use crate::monitor::resources::check_resources;
use crate::monitor::screenshot::take_screenshot;
use crate::monitor::types::{
    DetectionResult, DetectionStatus, ErrorType, PerformanceMetrics, ResourceCheckResult,
};
use crate::util::format_time;
use chrono::{Local, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOAD_WAIT: Duration = Duration::from_secs(10);

struct Checked {
    http_status: Option<u16>,
    metrics: PerformanceMetrics,
    resources: ResourceCheckResult,
    screenshot: Option<String>,
}

/// Runs checks one after another on a single browser.
pub struct Detector {
    browser: Browser,
    config: MonitorConfig,
    root: PathBuf,
}

impl Detector {
    /// Wrap an existing browser. Screenshots go below `root`.
    pub fn new(browser: Browser, config: MonitorConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            browser,
            config,
            root: root.into(),
        }
    }

    /// Launch Chrome from the harness config, with headless mode taken from the monitor config.
    pub async fn launch(
        harness: &HarnessConfig,
        config: MonitorConfig,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut options = LaunchOptions::from_config(harness)?;
        options.headless = config.browser.headless;
        let browser = Browser::launch(options).await?;
        Ok(Self::new(browser, config, root))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check one URL in a fresh context carrying the configured viewport.
    pub async fn detect_website(&self, url: &str) -> DetectionResult {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let detection_time = format_time(&Local::now());
        tracing::info!("Detecting {}", url);

        let context = match self.browser.new_context(self.config.context_options()).await {
            Ok(context) => context,
            Err(e) => return failed(url, timestamp, detection_time, &e.to_string(), None),
        };
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                close_quietly(None, &context).await;
                return failed(url, timestamp, detection_time, &e.to_string(), None);
            }
        };

        let result = match self.run_checks(&page, url, &detection_time).await {
            Ok(checked) => DetectionResult {
                url: url.to_string(),
                timestamp,
                detection_time,
                status: DetectionStatus::Success,
                http_status: checked.http_status,
                load_time: Some(checked.metrics.total_load_time),
                performance_metrics: Some(checked.metrics),
                resource_check: Some(checked.resources),
                screenshot_path: checked.screenshot,
                error: None,
                error_type: None,
            },
            Err(e) => {
                let screenshot = take_screenshot(&page, &self.root, url, &detection_time)
                    .await
                    .ok();
                failed(url, timestamp, detection_time, &e.to_string(), screenshot)
            }
        };

        close_quietly(Some(&page), &context).await;
        result
    }

    async fn run_checks(&self, page: &Page, url: &str, detection_time: &str) -> Result<Checked> {
        let timeout = self.config.navigation_timeout();
        let navigation = page
            .goto(
                url,
                GotoOptions {
                    wait_until: WaitUntil::Commit,
                    timeout,
                },
            )
            .await?;

        Attempt::from_result(page.wait_for_network_idle(timeout).await)
            .warn_skipped("Network idle");
        if let Attempt::Skipped(reason) =
            Attempt::from_result(page.wait_for_load_state(LoadState::Load, LOAD_WAIT).await)
        {
            tracing::debug!("Load event not seen for {}: {}", url, reason);
        }

        let metrics = collect_performance_metrics(page).await;
        let resources = check_resources(page).await;
        let screenshot = Attempt::from_result(
            take_screenshot(page, &self.root, url, detection_time).await,
        )
        .warn_skipped("Screenshot")
        .ok();

        Ok(Checked {
            http_status: navigation.status,
            metrics,
            resources,
            screenshot,
        })
    }

    /// Check each URL in order, reporting every result as it lands.
    pub async fn detect_batch<F>(&self, urls: &[String], mut on_result: F) -> Vec<DetectionResult>
    where
        F: FnMut(usize, &DetectionResult),
    {
        let mut results = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let result = self.detect_website(url).await;
            on_result(i, &result);
            results.push(result);
        }
        results
    }

    pub async fn close(&self) -> Result<()> {
        self.browser.close().await
    }
}

fn failed(
    url: &str,
    timestamp: String,
    detection_time: String,
    message: &str,
    screenshot_path: Option<String>,
) -> DetectionResult {
    tracing::warn!("Detection of {} failed: {}", url, message);
    let error = if message.is_empty() { "Unknown error" } else { message };
    DetectionResult {
        url: url.to_string(),
        timestamp,
        detection_time,
        status: DetectionStatus::Failed,
        http_status: None,
        load_time: None,
        performance_metrics: None,
        resource_check: None,
        screenshot_path,
        error: Some(error.to_string()),
        error_type: Some(ErrorType::classify(error)),
    }
}

async fn close_quietly(page: Option<&Page>, context: &BrowserContext) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close detection page: {}", e);
        }
    }
    if let Err(e) = context.close().await {
        tracing::debug!("Failed to close detection context: {}", e);
    }
}

/// Launch a browser, check every URL on it, then close it.
pub async fn detect_batch<F>(
    harness: &HarnessConfig,
    config: MonitorConfig,
    root: impl Into<PathBuf>,
    urls: &[String],
    on_result: F,
) -> Result<Vec<DetectionResult>>
where
    F: FnMut(usize, &DetectionResult),
{
    let detector = Detector::launch(harness, config, root).await?;
    let results = detector.detect_batch(urls, on_result).await;
    if let Err(e) = detector.close().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_classified() {
        let result = failed(
            "https://nowhere.test",
            "2024-03-07T10:00:00.000Z".to_string(),
            "100000".to_string(),
            "Navigation failed: net::ERR_NAME_NOT_RESOLVED at https://nowhere.test",
            None,
        );
        assert_eq!(result.status, DetectionStatus::Failed);
        assert_eq!(result.error_type, Some(ErrorType::Navigation));
        assert!(result.error.as_deref().unwrap().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_empty_message_is_unknown() {
        let result = failed("u", String::new(), String::new(), "", None);
        assert_eq!(result.error.as_deref(), Some("Unknown error"));
        assert_eq!(result.error_type, Some(ErrorType::Unknown));
    }
}
