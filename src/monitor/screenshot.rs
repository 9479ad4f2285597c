use crate::cdp::Page;
use crate::error::Result;
use crate::util::{extract_domain, format_date};
use chrono::Local;
use std::path::{Path, PathBuf};

pub const SCREENSHOT_DIR: &str = "detection-screenshots";

/// `detection-screenshots/<date>/<time>-<domain>.png`, relative to the output root.
pub fn screenshot_path(date: &str, detection_time: &str, url: &str) -> PathBuf {
    Path::new(SCREENSHOT_DIR)
        .join(date)
        .join(format!("{}-{}.png", detection_time, extract_domain(url)))
}

/// Full-page capture under `root`. Returns the path relative to `root`.
pub async fn take_screenshot(
    page: &Page,
    root: &Path,
    url: &str,
    detection_time: &str,
) -> Result<String> {
    let relative = screenshot_path(&format_date(&Local::now()), detection_time, url);
    let absolute = root.join(&relative);
    if let Some(parent) = absolute.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let png = page.screenshot(true).await?;
    std::fs::write(&absolute, png)?;

    tracing::debug!("Saved screenshot {}", absolute.display());
    Ok(relative.to_string_lossy().into_owned())
}
