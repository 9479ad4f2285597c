//! Real end-to-end browser tests.
//!
//! These tests launch an actual headless Chrome, serve fixture pages from an
//! in-process axum server, and drive them through the crate's helpers: traffic
//! recorders, UI stability, platform emulation, the chat helper, query checks
//! and the site monitor.
//!
//! Tests are **skipped** (not failed) when Chrome is not found. Set
//! `CHROME_PATH` to point at a specific binary.
//!
//! ## Running
//! ```
//! cargo test --test e2e_browser_test -- --nocapture --test-threads=1
//! ```

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use h5_agent_e2e::cdp::{Browser, GotoOptions, LaunchOptions, Page, WaitUntil};
use h5_agent_e2e::chat::ChatAgent;
use h5_agent_e2e::config::HarnessConfig;
use h5_agent_e2e::domains::DomainConfig;
use h5_agent_e2e::matcher::UrlPattern;
use h5_agent_e2e::monitor::{Detector, DetectionStatus, MonitorConfig};
use h5_agent_e2e::platform::{PlatformContext, PlatformType};
use h5_agent_e2e::query::UrlQueryChecker;
use h5_agent_e2e::stability::{wait_for_ui_stable, StabilityOptions, StabilityOutcome};
use h5_agent_e2e::suite::{verify_query_params, SuiteOptions};
use h5_agent_e2e::traffic::{ApiMonitor, NamedApiConfig, PerformanceMonitor, WebSocketMonitor};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

// ── helpers ──────────────────────────────────────────────────────────────────

/// Launch headless Chrome, or `None` when no binary is available.
async fn launch_browser() -> Option<Browser> {
    h5_agent_e2e::logging::init();
    let mut config = HarnessConfig::default();
    config.browser.headless = true;

    let Ok(options) = LaunchOptions::from_config(&config) else {
        eprintln!("SKIP: no Chrome");
        return None;
    };
    Some(Browser::launch(options).await.expect("failed to launch Chrome"))
}

async fn spawn_test_server() -> (String, oneshot::Sender<()>) {
    let app = Router::new()
        .route("/static", get(|| async { Html(HTML_STATIC) }))
        .route("/mutate", get(|| async { Html(HTML_MUTATE) }))
        .route("/traffic", get(|| async { Html(HTML_TRAFFIC) }))
        .route("/socket", get(|| async { Html(HTML_SOCKET) }))
        .route("/chat", get(|| async { Html(HTML_CHAT) }))
        .route("/agent.html", get(|| async { Html(HTML_STATIC) }))
        .route(
            "/api/foo",
            get(|| async { axum::Json(serde_json::json!({ "ok": true, "items": [1, 2] })) }),
        )
        .route(
            "/api/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/ws", get(ws_handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base = format!("http://127.0.0.1:{}", addr.port());

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .ok();
    });

    (base, tx)
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        for text in ["hello-1", "hello-2"] {
            if socket.send(Message::Text(text.to_string())).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn open(page: &Page, url: &str) {
    page.goto(
        url,
        GotoOptions {
            wait_until: WaitUntil::Load,
            timeout: Duration::from_secs(10),
        },
    )
    .await
    .unwrap();
}

/// Poll `check` every 50ms for up to 5s.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

// ── test HTML fixtures ────────────────────────────────────────────────────────

const HTML_STATIC: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Static Page</title></head>
<body><h1 id="heading">Nothing moves here</h1></body>
</html>"#;

const HTML_MUTATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Busy Page</title></head>
<body>
  <span id="tick">0</span>
  <script>
    let n = 0;
    setInterval(() => { document.getElementById('tick').textContent = String(++n); }, 50);
  </script>
</body>
</html>"#;

const HTML_TRAFFIC: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Traffic Page</title></head>
<body>
  <script>
    fetch('/api/foo').then(r => r.json());
    fetch('/api/fail').then(r => r.text());
  </script>
</body>
</html>"#;

const HTML_SOCKET: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Socket Page</title></head>
<body>
  <script>
    const ws = new WebSocket('ws://' + location.host + '/ws');
    ws.onmessage = (e) => { document.body.dataset.last = e.data; };
  </script>
</body>
</html>"#;

const HTML_CHAT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Chat Page</title></head>
<body>
  <div class="list historyWrapper_x1">
    <div class="msg" id="old">earlier conversation</div>
  </div>
  <div class="preloadList">
    <div class="msg" id="warm">preloaded</div>
  </div>
  <div class="chatList" id="live-list"></div>
  <input type="text" id="chat-input" />
  <script>
    const input = document.getElementById('chat-input');
    input.addEventListener('keydown', (e) => {
      if (e.key === 'Enter' && input.value) {
        const msg = document.createElement('div');
        msg.className = 'msg';
        msg.id = 'live';
        msg.textContent = input.value;
        document.getElementById('live-list').appendChild(msg);
        input.value = '';
      }
    });
  </script>
</body>
</html>"#;

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_query_params_of_agent_link() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();

    let url = format!("{}/agent.html?agent_id=1&user_id=2&channel=tbox_nologin&code=2#top", base);
    open(&page, &url).await;

    let checker = UrlQueryChecker::new(page.clone());
    checker.expect_param_exists("agent_id").await.unwrap();
    checker.expect_param_equals("channel", "tbox_nologin").await.unwrap();
    checker.expect_param_is_number("user_id").await.unwrap();
    checker.expect_param_not_exists("token").await.unwrap();
    checker.expect_hash("#top").await.unwrap();
    assert!(checker.expect_param_equals("code", "3").await.is_err());

    let domain = DomainConfig {
        name: "demo".to_string(),
        description: String::new(),
        url,
        query_url: None,
    };
    verify_query_params(&page, &domain, &SuiteOptions::default())
        .await
        .unwrap();

    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_recorder_flags_failing_rule() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();

    let monitor = ApiMonitor::new(page.clone());
    monitor
        .track(
            vec![
                NamedApiConfig::new("x", "api/fail").success_codes(vec![200]),
                NamedApiConfig::new("foo", "api/foo").method("GET"),
            ],
            None,
        )
        .await
        .unwrap();

    open(&page, &format!("{}/traffic", base)).await;
    assert!(
        eventually(|| {
            monitor.get_api_calls("x").len() == 1 && monitor.get_api_calls("foo").len() == 1
        })
        .await,
        "calls not recorded: {:?}",
        monitor.get_all_calls()
    );

    monitor.expect_api_called("foo", Some(1)).unwrap();
    monitor.expect_api_success("foo").unwrap();
    let foo = &monitor.get_api_calls("foo")[0];
    assert_eq!(foo.status, 200);

    let err = monitor.validate().unwrap_err().to_string();
    assert!(err.contains("x"), "{err}");
    assert!(err.contains("500"), "{err}");

    let by_url = monitor.get_calls_by_url(&UrlPattern::ends_with("/api/fail"));
    assert_eq!(by_url.len(), 1);
    assert!(monitor.report(true).contains("api/foo"));

    monitor.stop();
    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_performance_monitor_counts_page_traffic() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();

    let monitor = PerformanceMonitor::new(page.clone());
    monitor.start_monitoring().await.unwrap();
    open(&page, &format!("{}/traffic", base)).await;

    assert!(
        eventually(|| monitor.get_requests_by_domain("/api/").len() == 2
            && monitor
                .get_failed_requests()
                .iter()
                .any(|r| r.url.ends_with("/api/fail"))
            && monitor
                .get_successful_requests()
                .iter()
                .any(|r| r.url.ends_with("/api/foo")))
        .await,
        "traffic not seen: {:?}",
        monitor.get_all_requests()
    );

    let report = monitor.get_report().await;
    assert!(report.total_requests >= 3, "{report:?}");
    assert!(report.total_responses >= 3, "{report:?}");
    assert!(report.failed_requests >= 1, "{report:?}");
    let timing = report.performance_metrics.expect("navigation timing");
    assert!(timing.request >= 0.0);

    assert_eq!(monitor.get_responses_by_status().get(&500), Some(&1));
    assert_eq!(monitor.get_requests_by_type().get("document"), Some(&1));
    assert_eq!(monitor.get_requests_by_resource_type("fetch").len(), 2);

    monitor.stop();
    monitor.reset();
    assert!(monitor.get_all_responses().is_empty());
    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_recorder_collects_messages_in_order() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();

    let monitor = WebSocketMonitor::new(page.clone());
    monitor.start_monitoring().await.unwrap();
    open(&page, &format!("{}/socket", base)).await;

    let url_pattern = UrlPattern::contains("/ws");
    let conn = monitor
        .wait_for_connection(&url_pattern, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(conn.url.starts_with("ws://127.0.0.1"));

    let second = UrlPattern::exact("hello-2");
    monitor
        .wait_for_message(&url_pattern, Some(&second), Duration::from_secs(10))
        .await
        .unwrap();

    let host = UrlPattern::regex(r"127\.0\.0\.1").unwrap();
    assert_eq!(monitor.get_all_messages(Some(&host)), vec!["hello-1", "hello-2"]);
    assert!(monitor.get_all_messages(Some(&UrlPattern::contains("other"))).is_empty());

    monitor.expect_connected(&url_pattern).unwrap();
    monitor
        .expect_message_received(&url_pattern, Some(&UrlPattern::contains("hello-1")))
        .unwrap();
    assert!(monitor.expect_closed(&url_pattern).is_err());
    assert_eq!(monitor.get_connection_count(), 1);

    let missing = monitor
        .wait_for_connection(&UrlPattern::contains("nowhere"), Duration::from_millis(300))
        .await;
    assert!(missing.is_err());

    monitor.stop_monitoring();
    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ui_stable_quiet_and_busy_pages() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();

    open(&page, &format!("{}/static", base)).await;
    let started = Instant::now();
    let outcome = wait_for_ui_stable(
        &page,
        &StabilityOptions {
            stable_delay: Duration::from_millis(200),
            max_wait: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome, StabilityOutcome::Stable);
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());

    open(&page, &format!("{}/mutate", base)).await;
    let started = Instant::now();
    let outcome = wait_for_ui_stable(
        &page,
        &StabilityOptions {
            stable_delay: Duration::from_millis(300),
            max_wait: Duration::from_secs(1),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome, StabilityOutcome::MaxWaitReached);
    assert!(started.elapsed() >= Duration::from_millis(900));

    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_agent_sends_and_classifies() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let page = browser.new_page().await.unwrap();
    open(&page, &format!("{}/chat", base)).await;

    let agent = ChatAgent::new(page.clone());
    agent.send("hello agent").await.unwrap();

    let live = page.query_selector("#live").await.unwrap().expect("live message");
    assert_eq!(live.text_content().await.unwrap().as_deref(), Some("hello agent"));
    assert!(agent.is_chat_msg_element(&live).await.unwrap());

    let old = page.query_selector("#old").await.unwrap().unwrap();
    assert!(agent.is_history_element(&old).await.unwrap());
    assert!(!agent.is_chat_msg_element(&old).await.unwrap());

    let warm = page.query_selector("#warm").await.unwrap().unwrap();
    assert!(agent.is_preload_history_element(&warm).await.unwrap());

    let messages = page.query_selector_all(".msg").await.unwrap();
    assert_eq!(messages.len(), 3);

    let mut no_input = ChatAgent::new(page.clone());
    no_input.set_input_selectors(vec!["#missing".to_string()]);
    let err = no_input.find_input().await.unwrap_err().to_string();
    assert!(err.contains("#missing"), "{err}");

    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_platform_pages_carry_user_agent_and_viewport() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;

    let mut platforms = PlatformContext::new(browser.clone());
    let alipay = platforms.create_platform_page(PlatformType::Alipay).await.unwrap();
    let ios = platforms.create_platform_page(PlatformType::WechatIos).await.unwrap();
    assert_eq!(platforms.tracked(), 2);

    open(&alipay.page, &format!("{}/static", base)).await;
    let ua = alipay.page.evaluate("navigator.userAgent").await.unwrap();
    assert!(ua.as_str().unwrap().contains("AlipayClient"));
    let width = alipay.page.evaluate("window.innerWidth").await.unwrap();
    assert_eq!(width.as_u64(), Some(375));

    open(&ios.page, &format!("{}/static", base)).await;
    let ua = ios.page.evaluate("navigator.userAgent").await.unwrap();
    assert!(ua.as_str().unwrap().contains("iPhone"));

    platforms.cleanup().await.unwrap();
    platforms.cleanup().await.unwrap();
    assert_eq!(platforms.tracked(), 0);

    browser.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detector_success_and_unreachable() {
    let Some(browser) = launch_browser().await else { return };
    let (base, _srv) = spawn_test_server().await;
    let out = tempfile::tempdir().unwrap();

    let detector = Detector::new(browser.clone(), MonitorConfig::default(), out.path());

    let ok = detector.detect_website(&format!("{}/traffic", base)).await;
    assert_eq!(ok.status, DetectionStatus::Success, "{:?}", ok.error);
    assert!(ok.load_time.unwrap() >= 0.0);
    assert_eq!(ok.http_status, Some(200));
    let shot = ok.screenshot_path.clone().expect("screenshot");
    assert!(out.path().join(&shot).exists());
    let resources = ok.resource_check.as_ref().unwrap();
    assert!(resources.resources_by_type.xhr >= 2);

    let bad = detector.detect_website("http://127.0.0.1:1/").await;
    assert_eq!(bad.status, DetectionStatus::Failed);
    assert!(bad.error.is_some());
    assert!(bad.error_type.is_some());

    browser.close().await.unwrap();
}
