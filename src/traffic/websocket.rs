//! WebSocket recorder built on the page's Network domain socket events.
//!
//! The registry lives host-side and is fed directly by protocol events, so
//! nothing is injected into the page. Reads hand out value snapshots.

use crate::cdp::{CdpEvent, Page};
use crate::error::{E2eError, Result};
use crate::matcher::UrlPattern;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(10_000);
const BINARY_PLACEHOLDER: &str = "[Binary Data]";

/// Mirrors `WebSocket.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> u8 {
        match state {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WsEventType {
    Open,
    Message,
    Close,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSocketEvent {
    #[serde(rename = "type")]
    pub kind: WsEventType,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebSocketEvent {
    fn new(kind: WsEventType) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data: None,
            error: None,
        }
    }
}

/// Point-in-time copy of one socket's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketConnection {
    pub url: String,
    pub ready_state: ReadyState,
    pub events: Vec<WebSocketEvent>,
    pub messages: Vec<String>,
    pub sent_messages: Vec<String>,
    pub created_at: i64,
}

impl WebSocketConnection {
    fn new(url: String) -> Self {
        Self {
            url,
            ready_state: ReadyState::Connecting,
            events: Vec::new(),
            messages: Vec::new(),
            sent_messages: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn has_event(&self, kind: WsEventType) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    pub fn is_open(&self) -> bool {
        self.has_event(WsEventType::Open)
    }

    pub fn is_closed(&self) -> bool {
        self.has_event(WsEventType::Close)
    }

    /// Newest message when `pattern` is `None`, else the oldest one matching it.
    pub fn find_message(&self, pattern: Option<&UrlPattern>) -> Option<&str> {
        match pattern {
            None => self.messages.last().map(String::as_str),
            Some(p) => self.messages.iter().map(String::as_str).find(|m| p.matches(m)),
        }
    }
}

/// Socket connections of one page, keyed by URL.
#[derive(Debug, Default)]
pub(crate) struct SocketRegistry {
    /// Protocol request id to socket URL
    sockets: HashMap<String, String>,
    /// In creation order
    connections: Vec<WebSocketConnection>,
}

impl SocketRegistry {
    /// Fold one protocol event in; returns whether anything changed.
    pub fn apply(&mut self, event: &CdpEvent) -> bool {
        let Some(request_id) = event.str_param("requestId") else {
            return false;
        };

        if event.method == "Network.webSocketCreated" {
            let Some(url) = event.str_param("url") else {
                return false;
            };
            // A new socket to a known URL replaces the earlier entry.
            self.connections.retain(|c| c.url != url);
            self.sockets.retain(|_, known| known != url);
            self.connections.push(WebSocketConnection::new(url.to_string()));
            self.sockets.insert(request_id.to_string(), url.to_string());
            tracing::debug!("WebSocket created: {}", url);
            return true;
        }

        let Some(url) = self.sockets.get(request_id) else {
            return false;
        };
        let Some(conn) = self.connections.iter_mut().find(|c| &c.url == url) else {
            return false;
        };

        match event.method.as_str() {
            "Network.webSocketHandshakeResponseReceived" => {
                conn.ready_state = ReadyState::Open;
                conn.events.push(WebSocketEvent::new(WsEventType::Open));
                tracing::debug!("WebSocket connected: {}", conn.url);
            }
            "Network.webSocketFrameReceived" => {
                let data = frame_payload(event);
                let mut message = WebSocketEvent::new(WsEventType::Message);
                message.data = Some(data.clone());
                conn.events.push(message);
                conn.messages.push(data);
            }
            "Network.webSocketFrameSent" => {
                conn.sent_messages.push(frame_payload(event));
            }
            "Network.webSocketFrameError" => {
                let mut error = WebSocketEvent::new(WsEventType::Error);
                error.error = Some(
                    event
                        .str_param("errorMessage")
                        .unwrap_or("WebSocket error occurred")
                        .to_string(),
                );
                conn.events.push(error);
                tracing::debug!("WebSocket error: {}", conn.url);
            }
            "Network.webSocketClosed" => {
                conn.ready_state = ReadyState::Closed;
                conn.events.push(WebSocketEvent::new(WsEventType::Close));
                tracing::debug!("WebSocket closed: {}", conn.url);
            }
            _ => return false,
        }
        true
    }

    pub fn connections(&self) -> &[WebSocketConnection] {
        &self.connections
    }

    pub fn matching<'a>(
        &'a self,
        pattern: &'a UrlPattern,
    ) -> impl Iterator<Item = &'a WebSocketConnection> + 'a {
        self.connections.iter().filter(move |c| pattern.matches(&c.url))
    }

    pub fn clear(&mut self) {
        self.sockets.clear();
        self.connections.clear();
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "========== WebSocket report ==========");
        let _ = writeln!(out, "Connections: {}", self.connections.len());

        if self.connections.is_empty() {
            let _ = writeln!(out, "No WebSocket connections observed");
        }

        for conn in &self.connections {
            let _ = writeln!(out, "\n[connection] {}", conn.url);
            let _ = writeln!(out, "  created: {}", format_millis(conn.created_at));
            let _ = writeln!(out, "  events: {}", conn.events.len());
            let _ = writeln!(out, "  messages: {}", conn.messages.len());

            if let Some(open) = conn.events.iter().find(|e| e.kind == WsEventType::Open) {
                let _ = writeln!(out, "  connected at {}", format_millis(open.timestamp));
            }
            if conn.is_closed() {
                let _ = writeln!(out, "  closed");
            }
            let errors = conn
                .events
                .iter()
                .filter(|e| e.kind == WsEventType::Error)
                .count();
            if errors > 0 {
                let _ = writeln!(out, "  errors: {}", errors);
            }
            if let Some(last) = conn.messages.last() {
                let _ = writeln!(out, "  latest message: {}", last);
            }
        }

        let _ = writeln!(out, "======================================");
        out
    }
}

fn frame_payload(event: &CdpEvent) -> String {
    let response = event.params.get("response");
    let opcode = response
        .and_then(|r| r.get("opcode"))
        .and_then(|o| o.as_u64())
        .unwrap_or(1);
    if opcode != 1 {
        return BINARY_PLACEHOLDER.to_string();
    }
    response
        .and_then(|r| r.get("payloadData"))
        .and_then(|p| p.as_str())
        .unwrap_or_default()
        .to_string()
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Records the WebSocket connections a page opens.
pub struct WebSocketMonitor {
    page: Page,
    registry: Arc<parking_lot::Mutex<SocketRegistry>>,
    changes: watch::Sender<u64>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketMonitor {
    pub fn new(page: Page) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            page,
            registry: Arc::new(parking_lot::Mutex::new(SocketRegistry::default())),
            changes,
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start recording. Call before navigating to catch sockets opened during load.
    pub async fn start_monitoring(&self) -> Result<()> {
        if self.is_monitoring() {
            tracing::warn!("WebSocket monitor is already running");
            return Ok(());
        }

        self.registry.lock().clear();
        let mut events = self.page.events();
        self.page.send("Network.enable", json!({})).await?;

        let registry = Arc::clone(&self.registry);
        let changes = self.changes.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if !event.method.starts_with("Network.webSocket") {
                    continue;
                }
                if registry.lock().apply(&event) {
                    changes.send_modify(|version| *version += 1);
                }
            }
        });

        *self.task.lock() = Some(handle);
        tracing::info!("WebSocket monitor started");
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("WebSocket monitor stopped");
        }
    }

    pub fn get_all_connections(&self) -> Vec<WebSocketConnection> {
        self.registry.lock().connections().to_vec()
    }

    pub fn get_connection(&self, url: &str) -> Option<WebSocketConnection> {
        self.registry
            .lock()
            .connections()
            .iter()
            .find(|c| c.url == url)
            .cloned()
    }

    pub fn get_connection_count(&self) -> usize {
        self.registry.lock().connections().len()
    }

    /// Messages of every connection matching `url_pattern` (all when `None`).
    pub fn get_all_messages(&self, url_pattern: Option<&UrlPattern>) -> Vec<String> {
        self.registry
            .lock()
            .connections()
            .iter()
            .filter(|c| url_pattern.map(|p| p.matches(&c.url)).unwrap_or(true))
            .flat_map(|c| c.messages.iter().cloned())
            .collect()
    }

    /// Re-run `check` on every registry change until it yields or `timeout` elapses.
    async fn wait_until<T>(
        &self,
        timeout: Duration,
        mut check: impl FnMut(&SocketRegistry) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut rx = self.changes.subscribe();

        loop {
            rx.borrow_and_update();
            let found = {
                let registry = self.registry.lock();
                check(&*registry)
            };
            if found.is_some() {
                return found;
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    /// Wait until a connection matching `url_pattern` has opened.
    pub async fn wait_for_connection(
        &self,
        url_pattern: &UrlPattern,
        timeout: Duration,
    ) -> Result<WebSocketConnection> {
        let found = self
            .wait_until(timeout, |registry| {
                registry.matching(url_pattern).find(|c| c.is_open()).cloned()
            })
            .await;

        match found {
            Some(conn) => {
                tracing::info!("WebSocket connected: {}", conn.url);
                Ok(conn)
            }
            None => Err(E2eError::Timeout(format!(
                "waiting for WebSocket connection {} ({}ms)",
                url_pattern,
                timeout.as_millis()
            ))),
        }
    }

    /// Wait for a message on a matching connection.
    ///
    /// Without `message_pattern` the newest message wins; with one, the oldest match.
    pub async fn wait_for_message(
        &self,
        url_pattern: &UrlPattern,
        message_pattern: Option<&UrlPattern>,
        timeout: Duration,
    ) -> Result<String> {
        let found = self
            .wait_until(timeout, |registry| {
                registry
                    .matching(url_pattern)
                    .find_map(|c| c.find_message(message_pattern))
                    .map(str::to_string)
            })
            .await;

        match found {
            Some(message) => {
                tracing::info!("WebSocket message received: {}", message);
                Ok(message)
            }
            None => Err(E2eError::Timeout(format!(
                "waiting for WebSocket message on {} ({}ms)",
                url_pattern,
                timeout.as_millis()
            ))),
        }
    }

    pub fn expect_connected(&self, url_pattern: &UrlPattern) -> Result<()> {
        let registry = self.registry.lock();
        let result = match registry.matching(url_pattern).next() {
            Some(conn) if conn.is_open() => Ok(()),
            Some(conn) => Err(E2eError::Assertion(format!(
                "WebSocket should be connected: {}",
                conn.url
            ))),
            None => Err(E2eError::Assertion(format!(
                "No WebSocket connection matching {}",
                url_pattern
            ))),
        };
        result
    }

    /// A pattern with no matching connection counts as closed.
    pub fn expect_closed(&self, url_pattern: &UrlPattern) -> Result<()> {
        let registry = self.registry.lock();
        let result = match registry.matching(url_pattern).next() {
            Some(conn) if conn.is_closed() => Ok(()),
            Some(conn) => Err(E2eError::Assertion(format!(
                "WebSocket should be closed: {}",
                conn.url
            ))),
            None => {
                tracing::info!("No WebSocket matching {}, treating as closed", url_pattern);
                Ok(())
            }
        };
        result
    }

    pub fn expect_message_received(
        &self,
        url_pattern: &UrlPattern,
        message_pattern: Option<&UrlPattern>,
    ) -> Result<()> {
        let registry = self.registry.lock();
        let conn = registry.matching(url_pattern).next().ok_or_else(|| {
            E2eError::NotFound(format!("No WebSocket connection matching {}", url_pattern))
        })?;

        if conn.messages.is_empty() {
            return Err(E2eError::Assertion(format!(
                "Expected at least one message on {}",
                conn.url
            )));
        }
        if let Some(pattern) = message_pattern {
            if conn.find_message(Some(pattern)).is_none() {
                return Err(E2eError::Assertion(format!(
                    "Expected a message matching {} on {}",
                    pattern, conn.url
                )));
            }
        }
        Ok(())
    }

    pub fn report(&self) -> String {
        self.registry.lock().report()
    }

    pub fn log_report(&self) {
        for line in self.report().lines() {
            tracing::info!("{}", line);
        }
    }

    pub fn clear(&self) {
        self.registry.lock().clear();
        self.changes.send_modify(|version| *version += 1);
    }
}

impl Drop for WebSocketMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
