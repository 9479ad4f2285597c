use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Chrome executable path; discovered when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,

    /// Browser launch settings
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Chat page helper defaults
    #[serde(default)]
    pub chat: ChatSettings,
}

impl HarnessConfig {
    /// Resolve the Chrome binary: `CHROME_PATH`, then the configured path,
    /// then well-known install locations, then a `PATH` lookup.
    pub fn resolve_chrome_path(&self) -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_PATH") {
            let pb = PathBuf::from(&p);
            if pb.exists() {
                return Some(pb);
            }
        }

        if let Some(path) = &self.chrome_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        for path in Self::default_chrome_candidates() {
            let pb = PathBuf::from(path);
            if pb.exists() {
                return Some(pb);
            }
        }

        for name in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(out) = Command::new("which").arg(name).output() {
                if out.status.success() {
                    let p = String::from_utf8_lossy(&out.stdout).trim().to_string();
                    let pb = PathBuf::from(&p);
                    if pb.exists() {
                        return Some(pb);
                    }
                }
            }
        }

        None
    }

    fn default_chrome_candidates() -> &'static [&'static str] {
        #[cfg(target_os = "linux")]
        {
            &[
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/usr/bin/chromium-browser",
                "/usr/bin/chromium",
                "/usr/local/bin/google-chrome",
                "/snap/bin/chromium",
            ]
        }
        #[cfg(target_os = "macos")]
        {
            &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ]
        }
        #[cfg(target_os = "windows")]
        {
            &[
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ]
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            &[]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run Chrome without a window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// How long to wait for the DevTools endpoint after spawning Chrome
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,

    /// Per-command CDP timeout
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Proxy server (e.g., "http://127.0.0.1:8889")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_server: Option<String>,

    /// UI language passed as `--lang`
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Extra launch arguments
    #[serde(default)]
    pub custom_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            launch_timeout_ms: default_launch_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            proxy_server: None,
            lang: default_lang(),
            custom_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Message input selectors, tried in order
    #[serde(default = "default_input_selectors")]
    pub input_selectors: Vec<String>,

    /// Pause between filling the input and pressing Enter
    #[serde(default = "default_wait_after_send_ms")]
    pub wait_after_send_ms: u64,

    /// Class marker of the history container
    #[serde(default = "default_history_marker")]
    pub history_marker: String,

    /// Class marker of the preloaded-history container
    #[serde(default = "default_preload_marker")]
    pub preload_marker: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            input_selectors: default_input_selectors(),
            wait_after_send_ms: default_wait_after_send_ms(),
            history_marker: default_history_marker(),
            preload_marker: default_preload_marker(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_launch_timeout_ms() -> u64 {
    15_000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_lang() -> String {
    "zh-CN".to_string()
}

pub fn default_input_selectors() -> Vec<String> {
    [
        r#"input[type="text"]"#,
        r#"input[placeholder*="输入"]"#,
        r#"input[placeholder*="问"]"#,
        r#"input[enterkeyhint*="send"]"#,
        "textarea",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_wait_after_send_ms() -> u64 {
    500
}

fn default_history_marker() -> String {
    "historyWrapper".to_string()
}

fn default_preload_marker() -> String {
    "preloadList".to_string()
}
