//! Raw WebSocket transport to a Chrome DevTools endpoint.
//!
//! Commands are correlated by id; everything else the browser sends is an
//! event and is fanned out on a broadcast channel.

use crate::error::{E2eError, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingResponses = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// A protocol event, tagged with the flattened target session it belongs to.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

impl CdpEvent {
    /// String field of `params`, if present.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

pub struct CdpConnection {
    ws_tx: Mutex<WsSink>,
    responses: PendingResponses,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    command_timeout: Duration,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a DevTools WebSocket URL and start the reader task.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| E2eError::Cdp(format!("Failed to connect WebSocket: {}", e)))?;
        let (tx, mut rx) = ws_stream.split();

        let responses: PendingResponses = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let reader = {
            let responses = responses.clone();
            let events = events.clone();
            let connected = connected.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => dispatch(&text, &responses, &events),
                        Ok(WsMessage::Close(_)) => {
                            tracing::debug!("CDP socket closed");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!("CDP socket error: {:?}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                connected.store(false, Ordering::SeqCst);
                // Dropping the senders wakes every pending command with a closed channel.
                responses.lock().clear();
            })
        };

        tracing::info!("CDP connected: {}", ws_url);

        Ok(Self {
            ws_tx: Mutex::new(tx),
            responses,
            events,
            next_id: AtomicU64::new(1),
            connected,
            command_timeout,
            reader,
        })
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a command and return its `result` object.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        self.send_with_timeout(method, params, session_id, self.command_timeout)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(E2eError::Cdp("WebSocket not connected".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.responses.lock().insert(id, tx);

        let mut command = json!({
            "id": id,
            "method": method,
            "params": params
        });
        if let Some(session_id) = session_id {
            command["sessionId"] = json!(session_id);
        }

        {
            let mut sink = self.ws_tx.lock().await;
            if let Err(e) = sink.send(WsMessage::Text(command.to_string())).await {
                self.responses.lock().remove(&id);
                return Err(E2eError::Cdp(format!("Failed to send {}: {}", method, e)));
            }
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(E2eError::Cdp(format!(
                    "Response channel closed for {}",
                    method
                )))
            }
            Err(_) => {
                self.responses.lock().remove(&id);
                return Err(E2eError::Timeout(format!(
                    "{} exceeded {}ms",
                    method,
                    timeout.as_millis()
                )));
            }
        };

        parse_response(method, response)
    }

    /// Close the socket. Pending commands fail with a closed channel.
    pub async fn close(&self) {
        let mut sink = self.ws_tx.lock().await;
        let _ = sink.close().await;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn dispatch(text: &str, responses: &PendingResponses, events: &broadcast::Sender<CdpEvent>) {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        tracing::trace!("Ignoring non-JSON CDP frame");
        return;
    };

    if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
        if let Some(sender) = responses.lock().remove(&id) {
            let _ = sender.send(json);
        }
        return;
    }

    if let Some(method) = json.get("method").and_then(|m| m.as_str()) {
        let event = CdpEvent {
            method: method.to_string(),
            params: json.get("params").cloned().unwrap_or(Value::Null),
            session_id: json
                .get("sessionId")
                .and_then(|s| s.as_str())
                .map(str::to_string),
        };
        // No subscribers is not an error.
        let _ = events.send(event);
    }
}

fn parse_response(method: &str, response: Value) -> Result<Value> {
    if let Some(err) = response.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(E2eError::Cdp(format!("{} failed: {}", method, message)));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}
