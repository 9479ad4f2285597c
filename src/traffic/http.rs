//! HTTP API recorder fed by a page's Network domain events.
//!
//! Every request the page makes is recorded into an ordered call log, tagged
//! with the first registered rule whose URL pattern and method match.
//! Assertions over the log aggregate all violations into one error.

use crate::attempt::Attempt;
use crate::cdp::{CdpEvent, Page};
use crate::error::{E2eError, Result};
use crate::matcher::UrlPattern;
use base64::Engine as _;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_SUCCESS_CODES: [u16; 4] = [200, 201, 204, 304];
pub const DEFAULT_MAX_RESPONSE_TIME: Duration = Duration::from_millis(5000);
const STATIC_ASSET_PATTERN: &str = r"(?i)\.(png|jpg|jpeg|gif|ico|svg|woff|woff2|ttf|eot)$";

#[derive(Debug, Clone)]
pub struct ApiMonitorOptions {
    pub success_status_codes: Vec<u16>,
    pub max_response_time: Duration,
    /// Run schema and custom validators on JSON bodies
    pub validate_json: bool,
    /// Matching URLs pass through unrecorded
    pub ignore_patterns: Vec<Regex>,
    pub track_request_body: bool,
    pub track_response_body: bool,
}

impl Default for ApiMonitorOptions {
    fn default() -> Self {
        Self {
            success_status_codes: DEFAULT_SUCCESS_CODES.to_vec(),
            max_response_time: DEFAULT_MAX_RESPONSE_TIME,
            validate_json: true,
            ignore_patterns: Regex::new(STATIC_ASSET_PATTERN).into_iter().collect(),
            track_request_body: false,
            track_response_body: true,
        }
    }
}

type SchemaCheck = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;
type ValidatorFn = Arc<dyn Fn(&Value) -> std::result::Result<bool, String> + Send + Sync>;

/// Expected response shape, checked by deserializing the body into `T`.
#[derive(Clone)]
pub struct ResponseSchema {
    type_name: &'static str,
    check: SchemaCheck,
}

impl ResponseSchema {
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            check: Arc::new(|body: &Value| {
                T::deserialize(body).map(|_| ()).map_err(|e| e.to_string())
            }),
        }
    }

    pub fn check(&self, body: &Value) -> std::result::Result<(), String> {
        (self.check)(body)
    }
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseSchema<{}>", self.type_name)
    }
}

/// A named rule: which calls to track and how to judge them.
#[derive(Clone)]
pub struct NamedApiConfig {
    pub name: String,
    pub url_pattern: UrlPattern,
    pub method: Option<String>,
    pub success_status_codes: Option<Vec<u16>>,
    pub max_response_time: Option<Duration>,
    pub response_schema: Option<ResponseSchema>,
    response_validator: Option<ValidatorFn>,
}

impl NamedApiConfig {
    pub fn new(name: impl Into<String>, url_pattern: impl Into<UrlPattern>) -> Self {
        Self {
            name: name.into(),
            url_pattern: url_pattern.into(),
            method: None,
            success_status_codes: None,
            max_response_time: None,
            response_schema: None,
            response_validator: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn success_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.success_status_codes = Some(codes.into());
        self
    }

    pub fn max_response_time(mut self, max: Duration) -> Self {
        self.max_response_time = Some(max);
        self
    }

    pub fn schema<T: DeserializeOwned + 'static>(mut self) -> Self {
        self.response_schema = Some(ResponseSchema::of::<T>());
        self
    }

    /// Custom body check; `Ok(false)` and `Err` are both recorded as validation errors.
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<bool, String> + Send + Sync + 'static,
    {
        self.response_validator = Some(Arc::new(f));
        self
    }

    fn matches(&self, url: &str, method: &str) -> bool {
        let method_matches = self
            .method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(method))
            .unwrap_or(true);
        method_matches && self.url_pattern.matches(url)
    }

    fn validate_body(&self, body: &Value) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(schema) = &self.response_schema {
            if let Err(e) = schema.check(body) {
                errors.push(format!("Schema validation failed: {}", e));
            }
        }

        if let Some(validator) = &self.response_validator {
            match validator(body) {
                Ok(true) => {}
                Ok(false) => errors.push("Custom validator returned false".to_string()),
                Err(e) => errors.push(format!("Custom validator error: {}", e)),
            }
        }

        errors
    }
}

impl fmt::Debug for NamedApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedApiConfig")
            .field("name", &self.name)
            .field("url_pattern", &self.url_pattern)
            .field("method", &self.method)
            .field("success_status_codes", &self.success_status_codes)
            .field("max_response_time", &self.max_response_time)
            .field("response_schema", &self.response_schema)
            .field("response_validator", &self.response_validator.is_some())
            .finish()
    }
}

/// Response body as captured: parsed JSON, or the raw text when parsing failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

/// One recorded request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    pub name: Option<String>,
    pub url: String,
    pub method: String,
    /// 0 when the browser cancelled the request or no response arrived
    pub status: u16,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<ResponseBody>,
    pub content_type: Option<String>,
    /// Epoch milliseconds at request start
    pub timestamp: i64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

/// A request whose lifecycle ended, before body and rule matching.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FinishedRequest {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub post_data: Option<String>,
    pub status: u16,
    pub content_type: Option<String>,
    pub duration_ms: u64,
    pub timestamp: i64,
    pub error: Option<String>,
    /// The body can still be fetched from the browser
    pub body_available: bool,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    url: String,
    method: String,
    post_data: Option<String>,
    started: f64,
    wall_time_ms: i64,
    status: u16,
    content_type: Option<String>,
    responded: Option<f64>,
}

impl PendingRequest {
    fn finish(
        self,
        request_id: &str,
        ended: f64,
        error: Option<String>,
        body_available: bool,
    ) -> FinishedRequest {
        let end = self.responded.unwrap_or(ended);
        FinishedRequest {
            request_id: request_id.to_string(),
            url: self.url,
            method: self.method,
            post_data: self.post_data,
            status: self.status,
            content_type: self.content_type,
            duration_ms: ((end - self.started) * 1000.0).max(0.0).round() as u64,
            timestamp: self.wall_time_ms,
            error,
            body_available,
        }
    }
}

/// Folds Network domain events into finished requests.
#[derive(Debug, Default)]
pub(crate) struct NetworkCapture {
    pending: HashMap<String, PendingRequest>,
}

impl NetworkCapture {
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn apply(
        &mut self,
        event: &CdpEvent,
        ignore: impl Fn(&str) -> bool,
    ) -> Option<FinishedRequest> {
        let request_id = event.str_param("requestId")?.to_string();
        let params = &event.params;
        let timestamp = params.get("timestamp").and_then(|t| t.as_f64()).unwrap_or(0.0);

        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                // A redirect reuses the request id; the hop that redirected ends here.
                let redirected = params.get("redirectResponse").and_then(|redirect| {
                    let mut previous = self.pending.remove(&request_id)?;
                    previous.status = response_status(redirect);
                    previous.content_type = response_content_type(redirect);
                    Some(previous.finish(&request_id, timestamp, None, false))
                });

                let request = params.get("request")?;
                let url = request.get("url").and_then(|u| u.as_str())?.to_string();
                if url.starts_with("data:") || ignore(&url) {
                    return redirected;
                }

                let wall_time_ms = params
                    .get("wallTime")
                    .and_then(|w| w.as_f64())
                    .map(|w| (w * 1000.0) as i64)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

                self.pending.insert(
                    request_id,
                    PendingRequest {
                        url,
                        method: request
                            .get("method")
                            .and_then(|m| m.as_str())
                            .unwrap_or("GET")
                            .to_string(),
                        post_data: request
                            .get("postData")
                            .and_then(|p| p.as_str())
                            .map(str::to_string),
                        started: timestamp,
                        wall_time_ms,
                        status: 0,
                        content_type: None,
                        responded: None,
                    },
                );
                redirected
            }
            "Network.responseReceived" => {
                if let Some(pending) = self.pending.get_mut(&request_id) {
                    if let Some(response) = params.get("response") {
                        pending.status = response_status(response);
                        pending.content_type = response_content_type(response);
                    }
                    pending.responded = Some(timestamp);
                }
                None
            }
            "Network.loadingFinished" => self
                .pending
                .remove(&request_id)
                .map(|pending| pending.finish(&request_id, timestamp, None, true)),
            "Network.loadingFailed" => {
                let pending = self.pending.remove(&request_id)?;
                let canceled = params
                    .get("canceled")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false);
                if canceled {
                    let mut finished = pending.finish(&request_id, timestamp, None, false);
                    finished.status = 0;
                    return Some(finished);
                }
                let error = params
                    .get("errorText")
                    .and_then(|e| e.as_str())
                    .unwrap_or("net::ERR_FAILED")
                    .to_string();
                Some(pending.finish(&request_id, timestamp, Some(error), false))
            }
            _ => None,
        }
    }
}

pub(crate) fn response_status(response: &Value) -> u16 {
    response
        .get("status")
        .and_then(|s| s.as_u64())
        .map(|s| s as u16)
        .unwrap_or(0)
}

fn response_content_type(response: &Value) -> Option<String> {
    if let Some(mime) = response.get("headers").and_then(|h| h.as_object()).and_then(|headers| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, v)| v.as_str())
    }) {
        return Some(mime.to_string());
    }
    response
        .get("mimeType")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Rules, options and the call log. Pure bookkeeping, no browser access.
#[derive(Debug, Default)]
pub(crate) struct CallLedger {
    options: ApiMonitorOptions,
    rules: Vec<NamedApiConfig>,
    calls: Vec<ApiCall>,
}

impl CallLedger {
    pub fn with_options(options: ApiMonitorOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &ApiMonitorOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ApiMonitorOptions) {
        self.options = options;
    }

    /// Register a rule; a rule with an existing name replaces it in place.
    pub fn register(&mut self, rule: NamedApiConfig) {
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rule(&self, name: &str) -> Option<&NamedApiConfig> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn should_ignore(&self, url: &str) -> bool {
        self.options.ignore_patterns.iter().any(|p| p.is_match(url))
    }

    /// First rule, in registration order, matching both URL and method.
    pub fn find_matching_rule(&self, url: &str, method: &str) -> Option<&NamedApiConfig> {
        self.rules.iter().find(|rule| rule.matches(url, method))
    }

    pub fn record(&mut self, finished: FinishedRequest, response_body: Option<ResponseBody>) {
        let rule = self.find_matching_rule(&finished.url, &finished.method);

        let validation_errors = match (rule, response_body.as_ref()) {
            (Some(rule), Some(body)) if self.options.validate_json => {
                let value = match body {
                    ResponseBody::Json(value) => value.clone(),
                    ResponseBody::Text(text) => Value::String(text.clone()),
                };
                rule.validate_body(&value)
            }
            _ => Vec::new(),
        };

        let call = ApiCall {
            name: rule.map(|r| r.name.clone()),
            url: finished.url,
            method: finished.method,
            status: finished.status,
            duration_ms: finished.duration_ms,
            request_body: finished
                .post_data
                .filter(|_| self.options.track_request_body),
            response_body,
            content_type: finished.content_type,
            timestamp: finished.timestamp,
            error: finished.error,
            validation_errors,
        };

        tracing::debug!(
            "API call [{}] {} -> {} ({}ms){}",
            call.method,
            call.url,
            call.status,
            call.duration_ms,
            call.name
                .as_deref()
                .map(|n| format!(" as \"{}\"", n))
                .unwrap_or_default()
        );
        self.calls.push(call);
    }

    pub fn calls(&self) -> &[ApiCall] {
        &self.calls
    }

    pub fn calls_named(&self, name: &str) -> Vec<ApiCall> {
        self.calls
            .iter()
            .filter(|c| c.name.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.rules.clear();
    }

    fn success_codes_for<'a>(&'a self, rule: Option<&'a NamedApiConfig>) -> &'a [u16] {
        rule.and_then(|r| r.success_status_codes.as_deref())
            .unwrap_or(self.options.success_status_codes.as_slice())
    }

    /// Check every registered rule; all violations are reported together.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for rule in &self.rules {
            let calls = self.calls_named(&rule.name);
            if calls.is_empty() {
                errors.push(format!("API \"{}\" was never called", rule.name));
                continue;
            }

            let success_codes = self.success_codes_for(Some(rule));
            let max_time = rule
                .max_response_time
                .unwrap_or(self.options.max_response_time);

            for (index, call) in calls.iter().enumerate() {
                // Status 0 means the browser aborted the request.
                if call.status == 0 {
                    continue;
                }
                let n = index + 1;

                if !success_codes.contains(&call.status) {
                    errors.push(format!(
                        "API \"{}\" [{}] unexpected status: {} (expected: {})",
                        rule.name,
                        n,
                        call.status,
                        join_codes(success_codes)
                    ));
                }
                if call.duration_ms as u128 > max_time.as_millis() {
                    errors.push(format!(
                        "API \"{}\" [{}] too slow: {}ms (max: {}ms)",
                        rule.name,
                        n,
                        call.duration_ms,
                        max_time.as_millis()
                    ));
                }
                if !call.validation_errors.is_empty() {
                    errors.push(format!(
                        "API \"{}\" [{}] validation failed: {}",
                        rule.name,
                        n,
                        call.validation_errors.join("; ")
                    ));
                }
                if let Some(error) = &call.error {
                    errors.push(format!(
                        "API \"{}\" [{}] request error: {}",
                        rule.name, n, error
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(E2eError::ApiValidation(errors.join("\n")));
        }

        tracing::info!("All API checks passed ({} APIs)", self.rules.len());
        Ok(())
    }

    pub fn expect_api_called(&self, name: &str, times: Option<usize>) -> Result<()> {
        let count = self.calls_named(name).len();
        match times {
            Some(expected) if count != expected => Err(E2eError::Assertion(format!(
                "API \"{}\" expected to be called {} times, but was called {} times",
                name, expected, count
            ))),
            None if count == 0 => Err(E2eError::Assertion(format!(
                "API \"{}\" expected to be called at least once",
                name
            ))),
            _ => Ok(()),
        }
    }

    pub fn expect_api_success(&self, name: &str) -> Result<()> {
        let calls = self.calls_named(name);
        if calls.is_empty() {
            return Err(E2eError::Assertion(format!(
                "No calls recorded for API \"{}\"",
                name
            )));
        }

        let success_codes = self.success_codes_for(self.rule(name));
        let failed: Vec<&ApiCall> = calls
            .iter()
            .filter(|c| !success_codes.contains(&c.status) || c.error.is_some())
            .collect();

        if failed.is_empty() {
            return Ok(());
        }

        let details = failed
            .iter()
            .map(|c| match &c.error {
                Some(error) => format!("- {}: status {}, error: {}", c.url, c.status, error),
                None => format!("- {}: status {}", c.url, c.status),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Err(E2eError::Assertion(format!(
            "API \"{}\" failed {} times:\n{}",
            name,
            failed.len(),
            details
        )))
    }

    pub fn report(&self, show_all_calls: bool) -> String {
        let codes = &self.options.success_status_codes;
        let icon = |status: u16| if codes.contains(&status) { "OK " } else { "ERR" };
        let mut out = String::new();

        let _ = writeln!(out, "========== API call report ==========");
        let _ = writeln!(out, "Total calls: {}", self.calls.len());
        let _ = writeln!(out, "Named APIs: {}", self.rules.len());

        for rule in &self.rules {
            let calls = self.calls_named(&rule.name);
            let successes = calls.iter().filter(|c| codes.contains(&c.status)).count();
            let average = if calls.is_empty() {
                0.0
            } else {
                calls.iter().map(|c| c.duration_ms as f64).sum::<f64>() / calls.len() as f64
            };

            let _ = writeln!(out, "\n  [{}]", rule.name);
            let _ = writeln!(out, "    calls: {}", calls.len());
            let _ = writeln!(out, "    successful: {}", successes);
            let _ = writeln!(out, "    average duration: {:.2}ms", average);
            if let Some(last) = calls.last() {
                let _ = writeln!(out, "    last call: {}", last.url);
            }

            let invalid: Vec<&ApiCall> = calls
                .iter()
                .filter(|c| !c.validation_errors.is_empty())
                .collect();
            if !invalid.is_empty() {
                let _ = writeln!(out, "    validation errors: {}", invalid.len());
                for call in invalid {
                    let _ = writeln!(out, "      - {}", call.validation_errors.join("; "));
                }
            }

            if !calls.is_empty() {
                let _ = writeln!(out, "    calls:");
                for (i, call) in calls.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "      {}. {} [{}] {}",
                        i + 1,
                        icon(call.status),
                        call.method,
                        truncate(&call.url, 70)
                    );
                    let _ = writeln!(
                        out,
                        "         status: {}, duration: {}ms",
                        call.status, call.duration_ms
                    );
                }
            }
        }

        if show_all_calls && !self.calls.is_empty() {
            let _ = writeln!(out, "\nAll calls:");
            for (i, call) in self.calls.iter().take(10).enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {} [{}] {}",
                    i + 1,
                    icon(call.status),
                    call.method,
                    truncate(&call.url, 80)
                );
                let _ = writeln!(
                    out,
                    "     status: {}, duration: {}ms",
                    call.status, call.duration_ms
                );
            }
            if self.calls.len() > 10 {
                let _ = writeln!(out, "  ... {} more", self.calls.len() - 10);
            }
        }

        let _ = writeln!(out, "=====================================");
        out
    }
}

fn join_codes(codes: &[u16]) -> String {
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Records and validates the HTTP API traffic of one page.
pub struct ApiMonitor {
    page: Page,
    ledger: Arc<parking_lot::Mutex<CallLedger>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ApiMonitor {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            ledger: Arc::new(parking_lot::Mutex::new(CallLedger::default())),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Register rules and replace the options when given.
    pub fn configure(&self, rules: Vec<NamedApiConfig>, options: Option<ApiMonitorOptions>) {
        let mut ledger = self.ledger.lock();
        if let Some(options) = options {
            ledger.set_options(options);
        }
        for rule in rules {
            ledger.register(rule);
        }
    }

    /// Configure then start recording.
    pub async fn track(
        &self,
        rules: Vec<NamedApiConfig>,
        options: Option<ApiMonitorOptions>,
    ) -> Result<()> {
        self.configure(rules, options);
        self.start(None).await
    }

    pub fn is_tracking(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start recording every request of the page. Starting twice only warns.
    pub async fn start(&self, options: Option<ApiMonitorOptions>) -> Result<()> {
        if self.is_tracking() {
            tracing::warn!("API monitor is already running");
            return Ok(());
        }

        {
            let mut ledger = self.ledger.lock();
            if let Some(options) = options {
                ledger.set_options(options);
            }
            ledger.clear_calls();
        }

        // Subscribe before returning so no request of the next navigation is missed.
        let mut events = self.page.events();
        self.page.send("Network.enable", json!({})).await?;

        let page = self.page.clone();
        let ledger = Arc::clone(&self.ledger);
        let handle = tokio::spawn(async move {
            let mut capture = NetworkCapture::default();
            while let Some(event) = events.next().await {
                let finished = {
                    let guard = ledger.lock();
                    capture.apply(&event, |url| guard.should_ignore(url))
                };
                let Some(finished) = finished else { continue };

                let wants_body = finished.body_available
                    && ledger.lock().options().track_response_body
                    && finished
                        .content_type
                        .as_deref()
                        .map(|ct| ct.contains("application/json"))
                        .unwrap_or(false);

                let body = if wants_body {
                    fetch_response_body(&page, &finished.request_id)
                        .await
                        .map(ResponseBody::parse)
                        .ok()
                } else {
                    None
                };

                ledger.lock().record(finished, body);
            }
            tracing::debug!("API monitor event stream ended");
        });

        *self.task.lock() = Some(handle);
        tracing::info!("API monitor started");
        Ok(())
    }

    /// Stop recording. Stopping twice is a no-op.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("API monitor stopped");
        }
    }

    pub fn get_all_calls(&self) -> Vec<ApiCall> {
        self.ledger.lock().calls().to_vec()
    }

    pub fn get_api_calls(&self, name: &str) -> Vec<ApiCall> {
        self.ledger.lock().calls_named(name)
    }

    pub fn get_calls_by_url(&self, pattern: &UrlPattern) -> Vec<ApiCall> {
        self.ledger
            .lock()
            .calls()
            .iter()
            .filter(|c| pattern.matches(&c.url))
            .cloned()
            .collect()
    }

    pub fn expect_api_called(&self, name: &str, times: Option<usize>) -> Result<()> {
        self.ledger.lock().expect_api_called(name, times)
    }

    pub fn expect_api_success(&self, name: &str) -> Result<()> {
        self.ledger.lock().expect_api_success(name)
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger.lock().validate()
    }

    pub fn report(&self, show_all_calls: bool) -> String {
        self.ledger.lock().report(show_all_calls)
    }

    pub fn log_report(&self, show_all_calls: bool) {
        for line in self.report(show_all_calls).lines() {
            tracing::info!("{}", line);
        }
    }

    /// Drop recorded calls and registered rules.
    pub fn clear(&self) {
        self.ledger.lock().clear();
    }
}

impl Drop for ApiMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Bodies of responses the browser already evicted cannot be read; that is a skip.
async fn fetch_response_body(page: &Page, request_id: &str) -> Attempt<String> {
    let result = page
        .send("Network.getResponseBody", json!({ "requestId": request_id }))
        .await;

    let attempt = Attempt::from_result(result).and_then(|result| {
        let body = result.get("body").and_then(|b| b.as_str()).unwrap_or_default();
        let encoded = result
            .get("base64Encoded")
            .and_then(|b| b.as_bool())
            .unwrap_or(false);
        if !encoded {
            return Attempt::Done(body.to_string());
        }
        Attempt::from_result(
            base64::engine::general_purpose::STANDARD
                .decode(body)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        )
    });

    if let Some(reason) = attempt.skip_reason() {
        tracing::trace!("Response body of {} unavailable: {}", request_id, reason);
    }
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
            session_id: Some("S".to_string()),
        }
    }

    fn finished(url: &str, method: &str, status: u16) -> FinishedRequest {
        FinishedRequest {
            request_id: "1".to_string(),
            url: url.to_string(),
            method: method.to_string(),
            post_data: None,
            status,
            content_type: Some("application/json".to_string()),
            duration_ms: 20,
            timestamp: 0,
            error: None,
            body_available: true,
        }
    }

    #[test]
    fn test_validate_reports_rule_name_and_status() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("x", "api/foo").success_codes([200]));
        ledger.record(finished("https://h/api/foo", "GET", 500), None);

        let err = ledger.validate().unwrap_err().to_string();
        assert!(err.contains("\"x\""));
        assert!(err.contains("500"));
    }

    #[test]
    fn test_validate_never_called_and_status_zero_exempt() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("missing", "api/none"));
        ledger.register(NamedApiConfig::new("aborted", "api/aborted"));
        let mut aborted = finished("https://h/api/aborted", "GET", 0);
        aborted.duration_ms = 99_999;
        aborted.error = Some("net::ERR_ABORTED".to_string());
        ledger.record(aborted, None);

        let err = ledger.validate().unwrap_err().to_string();
        assert!(err.contains("\"missing\" was never called"));
        assert!(!err.contains("aborted"));
    }

    #[test]
    fn test_validate_latency_and_errors_aggregate() {
        let mut ledger = CallLedger::default();
        ledger.register(
            NamedApiConfig::new("slow", "api/slow").max_response_time(Duration::from_millis(100)),
        );
        let mut slow = finished("https://h/api/slow", "GET", 200);
        slow.duration_ms = 250;
        ledger.record(slow, None);
        let mut broken = finished("https://h/api/slow", "GET", 200);
        broken.error = Some("net::ERR_CONNECTION_RESET".to_string());
        ledger.record(broken, None);

        let err = ledger.validate().unwrap_err().to_string();
        assert!(err.contains("[1] too slow: 250ms (max: 100ms)"));
        assert!(err.contains("[2] request error: net::ERR_CONNECTION_RESET"));
    }

    #[test]
    fn test_expect_api_called_exact_count() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("x", "api/foo"));
        for _ in 0..3 {
            ledger.record(finished("https://h/api/foo", "GET", 200), None);
        }
        ledger.record(finished("https://h/api/other", "GET", 200), None);

        assert!(ledger.expect_api_called("x", Some(3)).is_ok());
        assert!(ledger.expect_api_called("x", None).is_ok());
        let err = ledger.expect_api_called("x", Some(2)).unwrap_err().to_string();
        assert!(err.contains("expected to be called 2 times, but was called 3 times"));
        assert!(ledger.expect_api_called("y", None).is_err());
    }

    #[test]
    fn test_first_registered_rule_owns_the_call() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("broad", "api/"));
        ledger.register(NamedApiConfig::new("narrow", "api/foo"));
        ledger.register(NamedApiConfig::new("post-only", "api/bar").method("POST"));
        // Overwriting keeps the original position.
        ledger.register(NamedApiConfig::new("broad", "api/"));

        ledger.record(finished("https://h/api/foo", "GET", 200), None);
        ledger.record(finished("https://h/other/bar", "GET", 200), None);

        let calls = ledger.calls();
        assert_eq!(calls[0].name.as_deref(), Some("broad"));
        assert_eq!(calls[1].name, None);
        assert_eq!(ledger.rule_count(), 3);
        assert_eq!(
            ledger.find_matching_rule("https://h/x/api/bar", "post").map(|r| r.name.as_str()),
            Some("broad")
        );
    }

    #[test]
    fn test_schema_and_validator_errors_recorded() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Reply {
            code: i32,
            data: Vec<String>,
        }

        let mut ledger = CallLedger::default();
        ledger.register(
            NamedApiConfig::new("list", "api/list")
                .schema::<Reply>()
                .validator(|body| Ok(body["code"] == 0)),
        );
        ledger.register(
            NamedApiConfig::new("boom", "api/boom").validator(|_| Err("exploded".to_string())),
        );

        ledger.record(
            finished("https://h/api/list", "GET", 200),
            Some(ResponseBody::Json(json!({ "code": 1 }))),
        );
        ledger.record(
            finished("https://h/api/boom", "GET", 200),
            Some(ResponseBody::Json(json!({}))),
        );

        let list = &ledger.calls()[0];
        assert_eq!(list.validation_errors.len(), 2);
        assert!(list.validation_errors[0].starts_with("Schema validation failed: "));
        assert_eq!(list.validation_errors[1], "Custom validator returned false");
        assert_eq!(
            ledger.calls()[1].validation_errors,
            vec!["Custom validator error: exploded".to_string()]
        );
        assert!(ledger.expect_api_success("list").is_ok());
        assert!(ledger.validate().is_err());
    }

    #[test]
    fn test_expect_api_success_lists_failures() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("x", "api/foo"));
        ledger.record(finished("https://h/api/foo", "GET", 200), None);
        ledger.record(finished("https://h/api/foo?b", "GET", 502), None);

        let err = ledger.expect_api_success("x").unwrap_err().to_string();
        assert!(err.contains("failed 1 times"));
        assert!(err.contains("- https://h/api/foo?b: status 502"));
    }

    #[test]
    fn test_request_body_only_when_tracked() {
        let mut ledger = CallLedger::default();
        let mut post = finished("https://h/api/foo", "POST", 200);
        post.post_data = Some("{\"q\":1}".to_string());
        ledger.record(post.clone(), None);
        assert_eq!(ledger.calls()[0].request_body, None);

        ledger.set_options(ApiMonitorOptions {
            track_request_body: true,
            ..Default::default()
        });
        ledger.record(post, None);
        assert_eq!(ledger.calls()[1].request_body.as_deref(), Some("{\"q\":1}"));
    }

    #[test]
    fn test_default_ignore_patterns() {
        let ledger = CallLedger::with_options(ApiMonitorOptions::default());
        assert!(ledger.should_ignore("https://cdn/logo.PNG"));
        assert!(ledger.should_ignore("https://cdn/font.woff2"));
        assert!(!ledger.should_ignore("https://h/api/foo"));
        assert!(!ledger.should_ignore("https://cdn/logo.png?v=2"));
    }

    #[test]
    fn test_capture_lifecycle() {
        let mut capture = NetworkCapture::default();
        let never = |_: &str| false;

        assert!(capture
            .apply(
                &event(
                    "Network.requestWillBeSent",
                    json!({
                        "requestId": "7",
                        "timestamp": 10.0,
                        "wallTime": 1700000000.5,
                        "request": { "url": "https://h/api/foo", "method": "POST", "postData": "a=1" }
                    }),
                ),
                never,
            )
            .is_none());
        assert_eq!(capture.in_flight(), 1);

        capture.apply(
            &event(
                "Network.responseReceived",
                json!({
                    "requestId": "7",
                    "timestamp": 10.25,
                    "response": { "status": 201, "headers": { "Content-Type": "application/json; charset=utf-8" }, "mimeType": "application/json" }
                }),
            ),
            never,
        );

        let done = capture
            .apply(
                &event("Network.loadingFinished", json!({ "requestId": "7", "timestamp": 10.4 })),
                never,
            )
            .unwrap();
        assert_eq!(done.status, 201);
        assert_eq!(done.duration_ms, 250);
        assert_eq!(done.method, "POST");
        assert_eq!(done.post_data.as_deref(), Some("a=1"));
        assert_eq!(done.timestamp, 1_700_000_000_500);
        assert_eq!(done.content_type.as_deref(), Some("application/json; charset=utf-8"));
        assert!(done.body_available);
        assert_eq!(capture.in_flight(), 0);
    }

    #[test]
    fn test_capture_cancelled_and_failed() {
        let mut capture = NetworkCapture::default();
        let never = |_: &str| false;
        for id in ["a", "b"] {
            capture.apply(
                &event(
                    "Network.requestWillBeSent",
                    json!({ "requestId": id, "timestamp": 1.0, "request": { "url": "https://h/x", "method": "GET" } }),
                ),
                never,
            );
        }

        let cancelled = capture
            .apply(
                &event(
                    "Network.loadingFailed",
                    json!({ "requestId": "a", "timestamp": 1.1, "errorText": "net::ERR_ABORTED", "canceled": true }),
                ),
                never,
            )
            .unwrap();
        assert_eq!(cancelled.status, 0);
        assert_eq!(cancelled.error, None);

        let failed = capture
            .apply(
                &event(
                    "Network.loadingFailed",
                    json!({ "requestId": "b", "timestamp": 1.5, "errorText": "net::ERR_CONNECTION_REFUSED" }),
                ),
                never,
            )
            .unwrap();
        assert_eq!(failed.status, 0);
        assert_eq!(failed.duration_ms, 500);
        assert_eq!(failed.error.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
        assert!(!failed.body_available);
    }

    #[test]
    fn test_capture_ignores_and_redirects() {
        let mut capture = NetworkCapture::default();
        let ignore_png = |url: &str| url.ends_with(".png");

        capture.apply(
            &event(
                "Network.requestWillBeSent",
                json!({ "requestId": "img", "timestamp": 1.0, "request": { "url": "https://h/a.png", "method": "GET" } }),
            ),
            ignore_png,
        );
        assert_eq!(capture.in_flight(), 0);

        capture.apply(
            &event(
                "Network.requestWillBeSent",
                json!({ "requestId": "r", "timestamp": 2.0, "request": { "url": "https://h/old", "method": "GET" } }),
            ),
            ignore_png,
        );
        let hop = capture
            .apply(
                &event(
                    "Network.requestWillBeSent",
                    json!({
                        "requestId": "r",
                        "timestamp": 2.1,
                        "redirectResponse": { "status": 302, "headers": {} },
                        "request": { "url": "https://h/new", "method": "GET" }
                    }),
                ),
                ignore_png,
            )
            .unwrap();
        assert_eq!(hop.url, "https://h/old");
        assert_eq!(hop.status, 302);
        assert_eq!(capture.in_flight(), 1);
    }

    #[test]
    fn test_response_body_parse_falls_back_to_text() {
        assert_eq!(
            ResponseBody::parse("{\"ok\":true}".to_string()),
            ResponseBody::Json(json!({ "ok": true }))
        );
        assert_eq!(
            ResponseBody::parse("not json".to_string()),
            ResponseBody::Text("not json".to_string())
        );
    }

    #[test]
    fn test_report_lists_named_calls() {
        let mut ledger = CallLedger::default();
        ledger.register(NamedApiConfig::new("x", "api/foo"));
        ledger.record(finished("https://h/api/foo", "GET", 200), None);
        ledger.record(finished("https://h/api/foo", "GET", 500), None);

        let report = ledger.report(true);
        assert!(report.contains("Total calls: 2"));
        assert!(report.contains("[x]"));
        assert!(report.contains("successful: 1"));
        assert!(report.contains("average duration: 20.00ms"));
        assert!(report.contains("All calls:"));
    }
}
