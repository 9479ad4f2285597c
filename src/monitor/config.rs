//! `monitor.config.json`: viewport and browser settings of the site monitor.
//!
//! Every field is optional in the file; missing ones fall back to a desktop
//! viewport. A file that fails to parse is reported and ignored.

use crate::cdp::{ContextOptions, Viewport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const MONITOR_CONFIG_FILE: &str = "monitor.config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorBrowserConfig {
    pub headless: bool,
    /// Navigation timeout in milliseconds
    pub timeout: u64,
}

impl Default for MonitorBrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub viewport: ViewportConfig,
    pub browser: MonitorBrowserConfig,
}

impl MonitorConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.timeout)
    }

    /// Emulation for the context each check runs in.
    pub fn context_options(&self) -> ContextOptions {
        let viewport = &self.viewport;
        ContextOptions {
            user_agent: viewport.user_agent.clone(),
            viewport: Some(Viewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: viewport.device_scale_factor,
                is_mobile: viewport.is_mobile,
                has_touch: viewport.has_touch,
            }),
        }
    }

    /// e.g. `desktop (1920x1080)`
    pub fn describe_viewport(&self) -> String {
        let kind = if self.viewport.is_mobile { "mobile" } else { "desktop" };
        format!("{} ({}x{})", kind, self.viewport.width, self.viewport.height)
    }
}

/// Load `monitor.config.json` from `dir`.
pub fn load_monitor_config(dir: &Path) -> MonitorConfig {
    let path = dir.join(MONITOR_CONFIG_FILE);

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            tracing::info!("No {} found, using desktop defaults", MONITOR_CONFIG_FILE);
            return MonitorConfig::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                "Failed to parse {}, using defaults: {}",
                path.display(),
                e
            );
            MonitorConfig::default()
        }
    }
}
