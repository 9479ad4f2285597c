//! Date stamps, URL helpers and JSON file IO for detection records.

use crate::error::Result;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use url::Url;

/// `YYYY-MM-DD`
pub fn format_date(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `HHmmss`
pub fn format_time(date: &DateTime<Local>) -> String {
    date.format("%H%M%S").to_string()
}

/// `YYYY-MM-DD HH:mm:ss`
pub fn format_date_time(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Host name of `url`, or `invalid-url`.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "invalid-url".to_string())
}

pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url).is_ok()
}

/// Pretty-print `data` to `path`, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(())
}

/// `None` when the file is missing or does not parse.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring unparsable JSON in {}: {}", path.display(), e);
            None
        }
    }
}
