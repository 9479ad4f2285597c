//! h5-monitor: check sites, time them, and keep dated records.
//!
//! Usage: h5-monitor [--out DIR] [URL...]  (prompts for URLs when none are given)

use anyhow::Context;
use clap::Parser;
use h5_agent_e2e::config::load_config;
use h5_agent_e2e::monitor::{interactive, load_monitor_config};
use h5_agent_e2e::util::is_valid_url;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "h5-monitor", version, about = "Check websites and record load metrics")]
struct Args {
    /// Directory holding monitor.config.json and receiving records and screenshots
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Directory to read monitor.config.json from, when different from --out
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// URLs to check; prompts interactively when none are given
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h5_agent_e2e::logging::init();
    let args = Args::parse();

    if let Some(bad) = args.urls.iter().find(|u| !is_valid_url(u)) {
        anyhow::bail!("Invalid URL: {}", bad);
    }

    let harness = load_config().context("Failed to load harness config")?;
    let config = load_monitor_config(args.config_dir.as_ref().unwrap_or(&args.out));

    interactive::run(&harness, config, args.out, args.urls)
        .await
        .context("Site check failed")?;
    Ok(())
}
