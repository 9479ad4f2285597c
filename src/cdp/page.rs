use crate::cdp::connection::{CdpConnection, CdpEvent};
use crate::cdp::element::ElementHandle;
use crate::cdp::ContextOptions;
use crate::error::{E2eError, Result};
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_QUIET_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// Main document response received
    Commit,
    DomContentLoaded,
    Load,
    /// Load, then no network activity for 500ms
    NetworkIdle,
}

#[derive(Debug, Clone)]
pub struct GotoOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
}

impl Default for GotoOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::Load,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a committed navigation.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub url: String,
    /// HTTP status of the main document, when the navigation had one
    pub status: Option<u16>,
}

/// One browser tab, attached through a flattened target session.
#[derive(Clone)]
pub struct Page {
    inner: Arc<PageInner>,
}

struct PageInner {
    conn: Arc<CdpConnection>,
    target_id: String,
    session_id: String,
    closed: AtomicBool,
}

/// Events of a single page session.
pub struct PageEvents {
    rx: broadcast::Receiver<CdpEvent>,
    session_id: String,
}

impl PageEvents {
    /// Next event for this page; `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<CdpEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.session_id.as_deref() == Some(self.session_id.as_str()) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Page event stream lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Page {
    pub(crate) async fn create(
        conn: Arc<CdpConnection>,
        browser_context_id: Option<&str>,
        emulation: Option<&ContextOptions>,
    ) -> Result<Self> {
        let mut params = json!({ "url": "about:blank" });
        if let Some(id) = browser_context_id {
            params["browserContextId"] = json!(id);
        }

        let target = conn.send("Target.createTarget", params, None).await?;
        let target_id = target
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| E2eError::Cdp("No targetId in response".to_string()))?
            .to_string();

        let attached = conn
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| E2eError::Cdp("No sessionId in response".to_string()))?
            .to_string();

        let page = Self {
            inner: Arc::new(PageInner {
                conn,
                target_id,
                session_id,
                closed: AtomicBool::new(false),
            }),
        };

        page.send("Page.enable", json!({})).await?;
        page.send("Runtime.enable", json!({})).await?;
        page.send("Network.enable", json!({})).await?;

        if let Some(options) = emulation {
            page.apply_emulation(options).await?;
        }

        tracing::debug!("Page {} attached", page.inner.target_id);
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.inner.target_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Send a command scoped to this page's session.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.inner
            .conn
            .send(method, params, Some(&self.inner.session_id))
            .await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.inner
            .conn
            .send_with_timeout(method, params, Some(&self.inner.session_id), timeout)
            .await
    }

    /// Subscribe to this page's protocol events from now on.
    pub fn events(&self) -> PageEvents {
        PageEvents {
            rx: self.inner.conn.subscribe(),
            session_id: self.inner.session_id.clone(),
        }
    }

    async fn apply_emulation(&self, options: &ContextOptions) -> Result<()> {
        if let Some(user_agent) = &options.user_agent {
            self.send(
                "Emulation.setUserAgentOverride",
                json!({ "userAgent": user_agent }),
            )
            .await?;
        }

        if let Some(viewport) = &options.viewport {
            self.send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": viewport.device_scale_factor,
                    "mobile": viewport.is_mobile
                }),
            )
            .await?;

            if viewport.has_touch {
                self.send(
                    "Emulation.setTouchEmulationEnabled",
                    json!({ "enabled": true, "maxTouchPoints": 5 }),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Navigate and wait for the requested milestone.
    pub async fn goto(&self, url: &str, options: GotoOptions) -> Result<Navigation> {
        let deadline = Instant::now() + options.timeout;
        let mut events = self.events();

        let result = self
            .send_with_timeout("Page.navigate", json!({ "url": url }), options.timeout)
            .await?;

        if let Some(error_text) = result
            .get("errorText")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return Err(E2eError::Navigation(format!("{} at {}", error_text, url)));
        }

        let status = match result.get("loaderId").and_then(|v| v.as_str()) {
            Some(loader_id) => {
                wait_for_document_response(&mut events, loader_id, url, deadline, options.timeout)
                    .await?
            }
            None => None,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match options.wait_until {
            WaitUntil::Commit => {}
            WaitUntil::DomContentLoaded => {
                self.wait_for_load_state(LoadState::DomContentLoaded, remaining)
                    .await?
            }
            WaitUntil::Load => self.wait_for_load_state(LoadState::Load, remaining).await?,
            WaitUntil::NetworkIdle => {
                self.wait_for_load_state(LoadState::Load, remaining).await?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.wait_for_network_idle(remaining).await?;
            }
        }

        tracing::info!("Navigated to: {} (status {:?})", url, status);
        Ok(Navigation {
            url: url.to_string(),
            status,
        })
    }

    /// Poll `document.readyState` until the state is reached.
    pub async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            // Evaluation fails while the old document is being torn down; keep polling.
            if let Ok(Value::String(ready)) = self.evaluate("document.readyState").await {
                let reached = match state {
                    LoadState::Load => ready == "complete",
                    LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
                };
                if reached {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(E2eError::Timeout(format!(
                    "{}ms exceeded waiting for load state {:?}",
                    timeout.as_millis(),
                    state
                )));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    /// Wait until no request has been in flight for 500ms.
    pub async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events();
        let mut inflight: HashSet<String> = HashSet::new();
        let mut quiet_until = Instant::now() + NETWORK_QUIET_PERIOD;

        loop {
            let wake = if inflight.is_empty() {
                quiet_until.min(deadline)
            } else {
                deadline
            };

            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        return Err(E2eError::Cdp("Connection closed while waiting for network idle".to_string()));
                    };
                    let request_id = event.str_param("requestId").map(str::to_string);
                    match (event.method.as_str(), request_id) {
                        ("Network.requestWillBeSent", Some(id)) => {
                            inflight.insert(id);
                        }
                        ("Network.loadingFinished", Some(id)) | ("Network.loadingFailed", Some(id)) => {
                            inflight.remove(&id);
                        }
                        _ => continue,
                    }
                    quiet_until = Instant::now() + NETWORK_QUIET_PERIOD;
                }
                _ = tokio::time::sleep_until(wake) => {
                    let now = Instant::now();
                    if inflight.is_empty() && now >= quiet_until {
                        return Ok(());
                    }
                    if now >= deadline {
                        return Err(E2eError::Timeout(format!(
                            "{}ms exceeded waiting for network idle ({} requests in flight)",
                            timeout.as_millis(),
                            inflight.len()
                        )));
                    }
                }
            }
        }
    }

    /// Evaluate an expression in the page, awaiting promises, returning the value by JSON.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.evaluate_with_timeout(expression, self.inner.conn.command_timeout())
            .await
    }

    pub async fn evaluate_with_timeout(&self, expression: &str, timeout: Duration) -> Result<Value> {
        let result = self
            .send_with_timeout(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true
                }),
                timeout,
            )
            .await?;
        remote_value(&result)
    }

    /// Get current URL from browser
    pub async fn url(&self) -> Result<String> {
        match self.evaluate("window.location.href").await? {
            Value::String(url) => Ok(url),
            other => Err(E2eError::Evaluation(format!(
                "Unexpected location value: {}",
                other
            ))),
        }
    }

    pub async fn title(&self) -> Result<Option<String>> {
        Ok(self
            .evaluate("document.title")
            .await?
            .as_str()
            .map(str::to_string))
    }

    /// First element matching `selector` in the main document.
    pub async fn query_selector(&self, selector: &str) -> Result<Option<ElementHandle>> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": format!("document.querySelector({})", js_string(selector)),
                    "returnByValue": false
                }),
            )
            .await?;
        check_exception(&result)?;

        Ok(result
            .get("result")
            .and_then(|r| r.get("objectId"))
            .and_then(|v| v.as_str())
            .map(|object_id| ElementHandle::new(self.clone(), object_id.to_string())))
    }

    /// All elements matching `selector`, in document order.
    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": format!("Array.from(document.querySelectorAll({}))", js_string(selector)),
                    "returnByValue": false
                }),
            )
            .await?;
        check_exception(&result)?;

        let array_id = result
            .get("result")
            .and_then(|r| r.get("objectId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| E2eError::Evaluation("querySelectorAll returned no object".to_string()))?
            .to_string();

        let properties = self
            .send(
                "Runtime.getProperties",
                json!({ "objectId": array_id, "ownProperties": true }),
            )
            .await?;

        let mut indexed: Vec<(usize, String)> = properties
            .get("result")
            .and_then(|r| r.as_array())
            .map(|props| {
                props
                    .iter()
                    .filter_map(|prop| {
                        let index = prop.get("name")?.as_str()?.parse::<usize>().ok()?;
                        let object_id = prop.get("value")?.get("objectId")?.as_str()?;
                        Some((index, object_id.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        indexed.sort_by_key(|(index, _)| *index);

        let _ = self
            .send("Runtime.releaseObject", json!({ "objectId": array_id }))
            .await;

        Ok(indexed
            .into_iter()
            .map(|(_, object_id)| ElementHandle::new(self.clone(), object_id))
            .collect())
    }

    /// Press a key on the focused element
    pub async fn press_key(&self, key: &str) -> Result<()> {
        let key_code = match key {
            "Enter" => 13,
            "Tab" => 9,
            "Escape" => 27,
            "Backspace" => 8,
            "ArrowUp" => 38,
            "ArrowDown" => 40,
            "ArrowLeft" => 37,
            "ArrowRight" => 39,
            _ => key.chars().next().map(|c| c as i32).unwrap_or(0),
        };
        let text = match key {
            "Enter" => Some("\r".to_string()),
            _ if key.chars().count() == 1 => Some(key.to_string()),
            _ => None,
        };

        let mut down = json!({
            "type": "keyDown",
            "key": key,
            "code": key,
            "windowsVirtualKeyCode": key_code
        });
        if let Some(text) = text {
            down["text"] = json!(text);
        }
        self.send("Input.dispatchKeyEvent", down).await?;

        self.send(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": key,
                "windowsVirtualKeyCode": key_code
            }),
        )
        .await?;

        tracing::debug!("Pressed key: {}", key);
        Ok(())
    }

    /// Take a PNG screenshot; `full_page` captures beyond the viewport.
    pub async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let mut params = json!({ "format": "png" });

        if full_page {
            let metrics = self.send("Page.getLayoutMetrics", json!({})).await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"));
            if let Some(size) = size {
                let width = size.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0).ceil();
                let height = size.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0).ceil();
                if width > 0.0 && height > 0.0 {
                    params["captureBeyondViewport"] = json!(true);
                    params["clip"] = json!({
                        "x": 0, "y": 0, "width": width, "height": height, "scale": 1
                    });
                }
            }
        }

        let result = self.send("Page.captureScreenshot", params).await?;
        let data = result
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| E2eError::Cdp("Failed to capture screenshot".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| E2eError::Cdp(format!("Invalid screenshot data: {}", e)))
    }

    pub async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Close the tab. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .conn
            .send(
                "Target.closeTarget",
                json!({ "targetId": self.inner.target_id }),
                None,
            )
            .await?;
        tracing::debug!("Page {} closed", self.inner.target_id);
        Ok(())
    }
}

async fn wait_for_document_response(
    events: &mut PageEvents,
    loader_id: &str,
    url: &str,
    deadline: Instant,
    timeout: Duration,
) -> Result<Option<u16>> {
    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(E2eError::Timeout(format!(
                    "{}ms exceeded navigating to {}",
                    timeout.as_millis(),
                    url
                )));
            }
        };
        let Some(event) = event else {
            return Err(E2eError::Cdp("Connection closed during navigation".to_string()));
        };

        match event.method.as_str() {
            "Network.responseReceived" if event.str_param("requestId") == Some(loader_id) => {
                let status = event
                    .params
                    .get("response")
                    .and_then(|r| r.get("status"))
                    .and_then(|s| s.as_u64())
                    .map(|s| s as u16);
                return Ok(status);
            }
            "Network.loadingFailed" if event.str_param("requestId") == Some(loader_id) => {
                let error_text = event.str_param("errorText").unwrap_or("net::ERR_FAILED");
                return Err(E2eError::Navigation(format!("{} at {}", error_text, url)));
            }
            // Documents without a network response (about:blank, data:) commit directly.
            "Page.frameNavigated" => {
                let is_main = event
                    .params
                    .get("frame")
                    .map(|f| f.get("parentId").is_none())
                    .unwrap_or(false);
                if is_main {
                    return Ok(None);
                }
            }
            _ => {}
        }
    }
}

/// Quote a string as a JavaScript literal.
pub(crate) fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn check_exception(result: &Value) -> Result<()> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("unknown exception");
        return Err(E2eError::Evaluation(text.to_string()));
    }
    Ok(())
}

/// Extract the by-value result of `Runtime.evaluate` / `Runtime.callFunctionOn`.
pub(crate) fn remote_value(result: &Value) -> Result<Value> {
    check_exception(result)?;
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"input[type="text"]"#), r#""input[type=\"text\"]""#);
        assert_eq!(js_string("it's"), r#""it's""#);
    }

    #[test]
    fn test_remote_value_extracts_value() {
        let result = json!({ "result": { "type": "string", "value": "complete" } });
        assert_eq!(remote_value(&result).unwrap(), json!("complete"));

        let undefined = json!({ "result": { "type": "undefined" } });
        assert_eq!(remote_value(&undefined).unwrap(), Value::Null);
    }

    #[test]
    fn test_remote_value_surfaces_exception() {
        let result = json!({
            "result": { "type": "object", "subtype": "error" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "ReferenceError: foo is not defined" }
            }
        });
        let err = remote_value(&result).unwrap_err();
        assert!(err.to_string().contains("ReferenceError"));
    }
}
