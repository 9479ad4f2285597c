//! h5-suite: visit every fixture domain on every platform, screenshot it and check its link.

use anyhow::Context;
use clap::Parser;
use h5_agent_e2e::cdp::{Browser, LaunchOptions};
use h5_agent_e2e::config::load_config;
use h5_agent_e2e::domains::load_domains;
use h5_agent_e2e::platform::PlatformType;
use h5_agent_e2e::suite::{run_suite, SuiteOptions};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "h5-suite", version, about = "Basic checks of agent pages per platform")]
struct Args {
    /// Platforms to run (alipay, wechat, wechat-ios); all when omitted
    #[arg(long = "platform", value_parser = parse_platform)]
    platforms: Vec<PlatformType>,

    /// Where screenshots are written
    #[arg(long, default_value = "screenshots/tbox")]
    screenshots: PathBuf,

    /// Show the browser window
    #[arg(long)]
    headed: bool,
}

fn parse_platform(s: &str) -> Result<PlatformType, String> {
    s.parse().map_err(|e: h5_agent_e2e::E2eError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h5_agent_e2e::logging::init();
    let args = Args::parse();

    let harness = load_config().context("Failed to load harness config")?;
    let domains = load_domains().context("Failed to load domain fixtures")?;

    let mut launch = LaunchOptions::from_config(&harness)?;
    if args.headed {
        launch.headless = false;
    }
    let browser = Browser::launch(launch).await?;

    let mut options = SuiteOptions {
        screenshot_dir: args.screenshots,
        ..SuiteOptions::default()
    };
    if !args.platforms.is_empty() {
        options.platforms = args.platforms;
    }

    let outcome = run_suite(&browser, &domains.domains, &options).await;
    if let Err(e) = browser.close().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    let report = outcome?;

    for case in &report.cases {
        match &case.error {
            None => println!("✓ {} [{}] {}", case.domain, case.platform, case.check),
            Some(error) => println!("✗ {} [{}] {}: {}", case.domain, case.platform, case.check, error),
        }
    }
    println!("\n{} passed, {} failed", report.passed(), report.failed());

    if report.failed() > 0 {
        anyhow::bail!("{} checks failed", report.failed());
    }
    Ok(())
}
