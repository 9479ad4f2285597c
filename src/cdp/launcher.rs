use crate::config::schema::HarnessConfig;
use crate::config::validation::{validate_browser_settings, validate_chrome_path};
use crate::error::{E2eError, Result};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

static CDP_PORT_COUNTER: AtomicU16 = AtomicU16::new(9222);

/// Allocate the next free remote-debugging port.
/// Starts at 9222 and increments, wrapping around at 65500; ports that are
/// already bound on localhost are skipped.
pub fn allocate_cdp_port() -> u16 {
    loop {
        let mut port = CDP_PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        if port > 65500 {
            CDP_PORT_COUNTER.store(9223, Ordering::SeqCst);
            port = 9222;
        }
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub chrome_path: PathBuf,
    pub headless: bool,
    pub port: u16,
    /// Throw-away profile directory, removed when the browser goes away
    pub user_data_dir: PathBuf,
    pub proxy_server: Option<String>,
    pub lang: String,
    pub custom_args: Vec<String>,
    pub launch_timeout: Duration,
    pub command_timeout: Duration,
}

impl LaunchOptions {
    /// Build launch options from the harness config, resolving the Chrome binary.
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let chrome_path = config.resolve_chrome_path().ok_or_else(|| {
            E2eError::Launch(
                "Chrome executable not found; set CHROME_PATH or chrome_path in the config"
                    .to_string(),
            )
        })?;
        validate_chrome_path(&chrome_path)?;

        let browser = &config.browser;
        validate_browser_settings(browser)?;
        Ok(Self {
            chrome_path,
            headless: browser.headless,
            port: allocate_cdp_port(),
            user_data_dir: std::env::temp_dir()
                .join(format!("h5-e2e-{}", uuid::Uuid::new_v4())),
            proxy_server: browser.proxy_server.clone(),
            lang: browser.lang.clone(),
            custom_args: browser.custom_args.clone(),
            launch_timeout: Duration::from_millis(browser.launch_timeout_ms),
            command_timeout: Duration::from_millis(browser.command_timeout_ms),
        })
    }
}

/// Build Chrome launch command with all parameters
pub fn build_command(options: &LaunchOptions) -> Command {
    let mut cmd = Command::new(&options.chrome_path);

    cmd.arg(format!("--remote-debugging-port={}", options.port));
    cmd.arg(format!(
        "--user-data-dir={}",
        options.user_data_dir.display()
    ));

    if options.headless {
        cmd.arg("--headless=new");
        cmd.arg("--disable-gpu");
    }

    cmd.arg("--no-first-run");
    cmd.arg("--no-default-browser-check");
    cmd.arg("--disable-background-networking");
    cmd.arg("--disable-sync");
    cmd.arg("--disable-default-apps");
    cmd.arg("--disable-dev-shm-usage");

    if let Some(proxy) = &options.proxy_server {
        cmd.arg(format!("--proxy-server={}", proxy));
    }

    cmd.arg(format!("--lang={}", options.lang));

    for arg in &options.custom_args {
        cmd.arg(arg);
    }

    cmd.arg("about:blank");
    cmd
}
