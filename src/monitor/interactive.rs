//! Terminal front end of the site monitor.

use crate::config::schema::HarnessConfig;
use crate::error::{E2eError, Result};
use crate::monitor::config::MonitorConfig;
use crate::monitor::detector::detect_batch;
use crate::monitor::report::{ReportWriter, RECORDS_DIR};
use crate::monitor::types::{BatchSummary, DetectionResult};
use crate::util::{format_date, format_time, is_valid_url};
use chrono::Local;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use owo_colors::OwoColorize;
use std::path::PathBuf;

fn rule() -> String {
    "━".repeat(40)
}

/// Ask for URLs until an empty line. Invalid ones are rejected and asked again.
pub fn prompt_urls() -> Result<Vec<String>> {
    let theme = ColorfulTheme::default();
    let mut urls = Vec::new();

    loop {
        let input: String = Input::with_theme(&theme)
            .with_prompt("URL to check (empty line to finish)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| E2eError::Prompt(format!("URL input error: {e}")))?;

        let url = input.trim();
        if url.is_empty() {
            break;
        }
        if is_valid_url(url) {
            println!("{}", format!("✓ Added: {}", url).green());
            urls.push(url.to_string());
        } else {
            println!("{}", "✗ Invalid URL, try again".red());
        }
    }

    Ok(urls)
}

/// `None` when the prompt was cancelled.
pub fn confirm_start(urls: &[String]) -> Result<Option<bool>> {
    println!("{}", format!("\nURLs to check ({}):", urls.len()).cyan());
    for (i, url) in urls.iter().enumerate() {
        println!("  {}. {}", i + 1, url);
    }

    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Start checking?")
        .default(true)
        .interact_opt()
        .map_err(|e| E2eError::Prompt(format!("Confirm prompt error: {e}")))
}

/// `[i/n] ✓ url (123ms)` or `[i/n] ✗ url (error)`, uncoloured.
pub fn progress_line(index: usize, total: usize, result: &DetectionResult) -> String {
    let progress = format!("[{}/{}]", index + 1, total);
    if result.is_success() {
        format!(
            "{} ✓ {} ({:.0}ms)",
            progress,
            result.url,
            result.load_time.unwrap_or_default()
        )
    } else {
        format!(
            "{} ✗ {} ({})",
            progress,
            result.url,
            result.error.as_deref().unwrap_or("Unknown error")
        )
    }
}

fn print_summary(summary: &BatchSummary, date: &str, timestamp: &str) {
    println!("\n{}", rule().cyan());
    println!("{}", "Detection finished!".green().bold());
    println!("{}", format!("\nRecords: {}/{}/", RECORDS_DIR, date).cyan());
    println!("{}", format!("Summary: {}-batch-summary.json", timestamp).cyan());

    println!("{}", "\nStatistics:".cyan());
    println!("  Total: {} URLs", summary.total_urls);
    println!("{}", format!("  Succeeded: {}", summary.success_count).green());
    if summary.failed_count > 0 {
        println!("{}", format!("  Failed: {}", summary.failed_count).red());
    }
    if let Some(average) = summary.summary.average_load_time {
        println!("  Average load time: {:.0}ms", average);
    }
    if let Some(fastest) = &summary.summary.fastest_url {
        println!("{}", format!("  Fastest: {}", fastest).green());
    }
    if let Some(slowest) = &summary.summary.slowest_url {
        println!("{}", format!("  Slowest: {}", slowest).yellow());
    }
    println!();
}

/// Check `urls`, print progress, persist every record and the batch summary.
///
/// With no URLs given, prompts for them first and asks for confirmation.
pub async fn run(
    harness: &HarnessConfig,
    config: MonitorConfig,
    root: PathBuf,
    mut urls: Vec<String>,
) -> Result<Option<BatchSummary>> {
    println!("{}", "\nSite monitor".cyan().bold());
    println!("{}", rule().cyan());
    println!("{}", format!("\nViewport: {}", config.describe_viewport()).cyan());

    if urls.is_empty() {
        urls = prompt_urls()?;
        if urls.is_empty() {
            println!("{}", "No URLs added".yellow());
            return Ok(None);
        }
        if confirm_start(&urls)? != Some(true) {
            println!("{}", "Cancelled".yellow());
            return Ok(None);
        }
    }

    println!("{}", "\nChecking...".cyan());
    println!("{}", rule().cyan());

    let writer = ReportWriter::new(&root);
    let date = format_date(&Local::now());
    let total = urls.len();

    let results = detect_batch(harness, config, root, &urls, |i, result| {
        let line = progress_line(i, total, result);
        if result.is_success() {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
        if let Err(e) = writer.save_single_result(result, &date) {
            tracing::error!("Failed to save result for {}: {}", result.url, e);
        }
    })
    .await?;

    let timestamp = format_time(&Local::now());
    let summary = writer.generate_batch_summary(&results, &date, &timestamp)?;
    print_summary(&summary, &date, &timestamp);
    Ok(Some(summary))
}
