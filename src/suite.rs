//! Basic agent-page checks run per domain fixture and per platform.

use crate::cdp::{Browser, GotoOptions, LoadState, Page, WaitUntil};
use crate::domains::DomainConfig;
use crate::error::Result;
use crate::platform::{PlatformContext, PlatformType};
use crate::query::QueryParams;
use crate::stability::{wait_for_ui_stable_with_log, StabilityOptions};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REQUIRED_PARAMS: [&str; 4] = ["agent_id", "user_id", "channel", "code"];
const EXPECTED_CHANNEL: &str = "tbox_nologin";

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub platforms: Vec<PlatformType>,
    pub screenshot_dir: PathBuf,
    pub navigation_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub ui_stable: StabilityOptions,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            platforms: PlatformType::ALL.to_vec(),
            screenshot_dir: PathBuf::from("screenshots/tbox"),
            navigation_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(30),
            ui_stable: StabilityOptions {
                max_wait: Duration::from_secs(3),
                ..StabilityOptions::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Visit,
    QueryParams,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visit => f.write_str("visit and screenshot"),
            Self::QueryParams => f.write_str("URL parameters"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub domain: String,
    pub platform: PlatformType,
    pub check: CheckKind,
    pub error: Option<String>,
    pub screenshot: Option<PathBuf>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub cases: Vec<CaseOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }
}

/// Agent links must carry the four ids, the no-login channel, and `code == user_id`.
pub fn check_agent_query(params: &QueryParams) -> Result<()> {
    for key in REQUIRED_PARAMS {
        params.expect_param_exists(key)?;
    }
    params.expect_param_equals("channel", EXPECTED_CHANNEL)?;
    let user_id = params.get_param("user_id").unwrap_or_default().to_string();
    params.expect_param_equals("code", &user_id)
}

pub fn screenshot_file(dir: &Path, platform: PlatformType, domain: &str) -> PathBuf {
    dir.join(platform.key()).join(format!("{}-initial.png", domain))
}

async fn open(page: &Page, url: &str, options: &SuiteOptions) -> Result<()> {
    page.goto(
        url,
        GotoOptions {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: options.navigation_timeout,
        },
    )
    .await?;
    Ok(())
}

/// Open the agent page, let it settle, and capture a full-page screenshot.
pub async fn visit_and_screenshot(
    page: &Page,
    domain: &DomainConfig,
    platform: PlatformType,
    options: &SuiteOptions,
) -> Result<PathBuf> {
    tracing::info!("Domain: {} ({})", domain.name, platform);
    tracing::info!("URL: {}", domain.url);

    open(page, &domain.url, options).await?;
    page.wait_for_load_state(LoadState::DomContentLoaded, options.navigation_timeout)
        .await?;
    if page
        .wait_for_network_idle(options.network_idle_timeout)
        .await
        .is_err()
    {
        tracing::info!("Network not fully idle, continuing");
    }
    wait_for_ui_stable_with_log(page, &options.ui_stable, Some("[waitForUIStable]")).await?;

    let path = screenshot_file(&options.screenshot_dir, platform, &domain.name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, page.screenshot(true).await?)?;

    tracing::info!("Page loaded, screenshot at {}", path.display());
    Ok(path)
}

/// Open the agent page and check the query of the URL it ended up on.
pub async fn verify_query_params(
    page: &Page,
    domain: &DomainConfig,
    options: &SuiteOptions,
) -> Result<()> {
    open(page, &domain.url, options).await?;
    let params = QueryParams::parse(&page.url().await?)?;
    check_agent_query(&params)?;
    tracing::info!("{} URL parameters verified", domain.name);
    Ok(())
}

/// Run both checks for every domain on every configured platform.
///
/// Each platform gets one emulated page shared by its cases. A failing case
/// is recorded and the run moves on.
pub async fn run_suite(
    browser: &Browser,
    domains: &[DomainConfig],
    options: &SuiteOptions,
) -> Result<SuiteReport> {
    let mut report = SuiteReport::default();

    for &platform in &options.platforms {
        let mut contexts = PlatformContext::new(browser.clone());
        let platform_page = match contexts.create_platform_page(platform).await {
            Ok(platform_page) => platform_page,
            Err(e) => {
                if let Err(cleanup) = contexts.cleanup().await {
                    tracing::warn!("Cleanup after failed platform setup: {}", cleanup);
                }
                return Err(e);
            }
        };
        let page = &platform_page.page;

        for domain in domains {
            for check in [CheckKind::Visit, CheckKind::QueryParams] {
                let (error, screenshot) = match check {
                    CheckKind::Visit => {
                        match visit_and_screenshot(page, domain, platform, options).await {
                            Ok(path) => (None, Some(path)),
                            Err(e) => (Some(e.to_string()), None),
                        }
                    }
                    CheckKind::QueryParams => (
                        verify_query_params(page, domain, options)
                            .await
                            .err()
                            .map(|e| e.to_string()),
                        None,
                    ),
                };

                if let Some(error) = &error {
                    tracing::error!("{} / {} / {} failed: {}", domain.name, platform, check, error);
                }
                report.cases.push(CaseOutcome {
                    domain: domain.name.clone(),
                    platform,
                    check,
                    error,
                    screenshot,
                });
            }
        }

        contexts.cleanup().await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_fixture_query_passes() {
        let params = QueryParams::parse(
            "https://example.test/agent.html?agent_id=1&user_id=2&channel=tbox_nologin&code=2",
        )
        .unwrap();
        check_agent_query(&params).unwrap();
    }

    #[test]
    fn test_query_rejects_mismatched_code() {
        let params = QueryParams::parse(
            "https://example.test/agent.html?agent_id=1&user_id=2&channel=tbox_nologin&code=3",
        )
        .unwrap();
        let err = check_agent_query(&params).unwrap_err().to_string();
        assert!(err.contains("code"));
    }

    #[test]
    fn test_query_rejects_missing_and_wrong_channel() {
        let missing = QueryParams::parse("https://example.test/agent.html?agent_id=1").unwrap();
        assert!(check_agent_query(&missing).is_err());

        let wrong = QueryParams::parse(
            "https://example.test/agent.html?agent_id=1&user_id=2&channel=app&code=2",
        )
        .unwrap();
        assert!(check_agent_query(&wrong)
            .unwrap_err()
            .to_string()
            .contains("channel"));
    }

    #[test]
    fn test_screenshot_layout_and_counts() {
        assert_eq!(
            screenshot_file(Path::new("shots"), PlatformType::WechatIos, "demo"),
            Path::new("shots/wechat-ios/demo-initial.png")
        );

        let report = SuiteReport {
            cases: vec![
                CaseOutcome {
                    domain: "demo".to_string(),
                    platform: PlatformType::Alipay,
                    check: CheckKind::Visit,
                    error: None,
                    screenshot: None,
                },
                CaseOutcome {
                    domain: "demo".to_string(),
                    platform: PlatformType::Alipay,
                    check: CheckKind::QueryParams,
                    error: Some("boom".to_string()),
                    screenshot: None,
                },
            ],
        };
        assert_eq!((report.passed(), report.failed()), (1, 1));
    }
}
