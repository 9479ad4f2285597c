use crate::cdp::connection::CdpConnection;
use crate::cdp::launcher::{build_command, LaunchOptions};
use crate::cdp::page::Page;
use crate::cdp::ContextOptions;
use crate::error::{E2eError, Result};
use serde_json::json;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DISCOVERY_INTERVAL: Duration = Duration::from_millis(500);

/// A Chrome instance driven over one browser-level CDP connection.
/// Clones share the same process; the process is killed when the last clone drops.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<BrowserInner>,
}

struct BrowserInner {
    conn: Arc<CdpConnection>,
    child: parking_lot::Mutex<Option<Child>>,
    user_data_dir: Option<PathBuf>,
    port: u16,
}

impl Browser {
    /// Launch Chrome with remote debugging enabled and connect to it.
    pub async fn launch(options: LaunchOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.user_data_dir)?;

        let mut child = build_command(&options)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| E2eError::Launch(format!("Failed to launch Chrome: {}", e)))?;

        tracing::info!(
            "Launched Chrome pid={} cdp_port={} headless={}",
            child.id(),
            options.port,
            options.headless
        );

        let conn = match discover_and_connect(options.port, &options).await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_dir_all(&options.user_data_dir);
                return Err(e);
            }
        };

        Ok(Self {
            inner: Arc::new(BrowserInner {
                conn: Arc::new(conn),
                child: parking_lot::Mutex::new(Some(child)),
                user_data_dir: Some(options.user_data_dir),
                port: options.port,
            }),
        })
    }

    /// Attach to a Chrome that is already listening on `port`.
    pub async fn connect(port: u16, command_timeout: Duration) -> Result<Self> {
        let ws_url = fetch_ws_url(port).await?;
        let conn = CdpConnection::connect(&ws_url, command_timeout).await?;
        Ok(Self {
            inner: Arc::new(BrowserInner {
                conn: Arc::new(conn),
                child: parking_lot::Mutex::new(None),
                user_data_dir: None,
                port,
            }),
        })
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.is_connected()
    }

    pub(crate) fn connection(&self) -> &Arc<CdpConnection> {
        &self.inner.conn
    }

    /// Create an isolated browser context carrying the given emulation.
    pub async fn new_context(&self, options: ContextOptions) -> Result<BrowserContext> {
        let result = self
            .inner
            .conn
            .send(
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": true }),
                None,
            )
            .await?;
        let id = result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| E2eError::Cdp("No browserContextId in response".to_string()))?
            .to_string();

        tracing::debug!("Created browser context {}", id);

        Ok(BrowserContext {
            inner: Arc::new(ContextInner {
                conn: Arc::clone(&self.inner.conn),
                id,
                options,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open a page in the default context, without emulation.
    pub async fn new_page(&self) -> Result<Page> {
        Page::create(Arc::clone(&self.inner.conn), None, None).await
    }

    /// Close the browser and clean up the process and its profile directory.
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .inner
            .conn
            .send_with_timeout("Browser.close", json!({}), None, Duration::from_secs(5))
            .await;
        self.inner.conn.close().await;
        self.inner.shutdown();
        tracing::info!("Browser on port {} closed", self.inner.port);
        Ok(())
    }
}

impl BrowserInner {
    fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(dir) = &self.user_data_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

impl Drop for BrowserInner {
    fn drop(&mut self) {
        // Ensure Chrome is killed when the last handle is dropped
        self.shutdown();
    }
}

/// An isolated session (cookies, storage, emulation) inside one browser.
#[derive(Clone)]
pub struct BrowserContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    conn: Arc<CdpConnection>,
    id: String,
    options: ContextOptions,
    closed: AtomicBool,
}

impl BrowserContext {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    pub async fn new_page(&self) -> Result<Page> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(E2eError::Cdp(format!(
                "Browser context {} is closed",
                self.inner.id
            )));
        }
        Page::create(
            Arc::clone(&self.inner.conn),
            Some(&self.inner.id),
            Some(&self.inner.options),
        )
        .await
    }

    /// Dispose the context and every page in it. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .conn
            .send(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.inner.id }),
                None,
            )
            .await?;
        tracing::debug!("Disposed browser context {}", self.inner.id);
        Ok(())
    }
}

async fn discover_and_connect(port: u16, options: &LaunchOptions) -> Result<CdpConnection> {
    let max_retries = (options.launch_timeout.as_millis() / DISCOVERY_INTERVAL.as_millis()).max(1);
    let mut last_error = String::new();

    for retry in 1..=max_retries {
        tokio::time::sleep(DISCOVERY_INTERVAL).await;

        match fetch_ws_url(port).await {
            Ok(ws_url) => return CdpConnection::connect(&ws_url, options.command_timeout).await,
            Err(e) => last_error = e.to_string(),
        }

        tracing::debug!("Retry {}/{}: {}", retry, max_retries, last_error);
    }

    Err(E2eError::Launch(format!(
        "Failed to connect to Chrome after {} retries: {}",
        max_retries, last_error
    )))
}

/// Read the browser-level WebSocket URL from `/json/version`.
async fn fetch_ws_url(port: u16) -> Result<String> {
    let version_url = format!("http://127.0.0.1:{}/json/version", port);

    let response = reqwest::get(&version_url)
        .await
        .map_err(|e| E2eError::Launch(format!("Connection error: {}", e)))?;
    if !response.status().is_success() {
        return Err(E2eError::Launch(format!("HTTP error: {}", response.status())));
    }

    let version: serde_json::Value = response
        .json()
        .await
        .map_err(|e| E2eError::Launch(format!("Failed to parse version response: {}", e)))?;

    version
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| E2eError::Launch("No webSocketDebuggerUrl in version response".to_string()))
}
