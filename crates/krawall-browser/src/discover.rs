//! Browser-mediated WebSocket discovery (spec.md §4.9, component C9).
//!
//! Loads the target's chat widget page in a sandboxed headless browser,
//! watches the CDP Network domain for the WebSocket the widget opens, and
//! captures the cookies/storage/frames/upgrade headers needed to
//! reconnect to it directly without the browser (spec.md §4.12 consumes
//! this as [`krawall_core::DiscoveryResult`]).

use std::collections::HashMap;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventWebSocketClosed, EventWebSocketCreated, EventWebSocketFrameReceived,
    EventWebSocketFrameSent, EventWebSocketWillSendHandshakeRequest,
};
use chromiumoxide::cdp::browser_protocol::page::EnableParams as PageEnableParams;
use chromiumoxide::Page;
use futures::StreamExt;
use krawall_core::{
    CapturedFrame, Cookie, DiscoveryResult, FrameDirection, KrawallError, KrawallResult,
};
use tracing::{info, warn};

use crate::classify::classify;
use crate::launch::{shared_browser, LaunchConfig};

/// How long discovery waits, after widget detection, for the widget to
/// open a WebSocket before giving up (spec.md §4.9 edge case).
const WEBSOCKET_WAIT: Duration = Duration::from_secs(15);

/// How long a single widget-detection click is given to produce a new
/// WebSocket before the next selector is tried (spec.md §4.9 step 5: "a
/// click succeeds only if followed by at least one WS connection within
/// a short window").
const WIDGET_CLICK_WINDOW: Duration = Duration::from_secs(5);

/// How long discovery keeps capturing frames on the discovered socket
/// once it has opened, to observe the initial handshake (spec.md §4.10).
const CAPTURE_WINDOW: Duration = Duration::from_secs(5);

/// Upper bound on how long the frame-capture window will be extended to
/// satisfy [`DiscoveryOptions::min_frame_count`] (spec.md §4.9 step 6).
const MAX_CAPTURE_EXTENSION: Duration = Duration::from_secs(10);

/// Delay after dismissing a cookie banner, giving the page a moment to
/// settle before widget detection runs (spec.md §4.9 step 4).
const COOKIE_BANNER_SETTLE: Duration = Duration::from_secs(1);

/// Fixed, ordered consent-framework selectors tried before widget
/// detection (spec.md §4.9 step 4). Silent on no match.
const COOKIE_BANNER_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[data-testid='uc-accept-all-button']",
    "button[aria-label='Accept all']",
    "button[aria-label='Accept cookies']",
    ".cc-btn.cc-allow",
    "#accept-cookie-notice",
    "button#cookie-accept",
];

/// Generic chat-widget selectors tried, in order, by the heuristic
/// strategy when no hint narrows the search (spec.md §4.9 step 5): known
/// providers by iframe src, ARIA labels, and common class/id/button-text
/// fragments.
const GENERIC_WIDGET_SELECTORS: &[&str] = &[
    "iframe[src*='intercom']",
    "iframe[src*='zendesk']",
    "iframe[src*='drift.com']",
    "iframe[src*='crisp.chat']",
    "iframe[title*='chat' i]",
    "[aria-label='Open chat' i]",
    "[aria-label='Chat' i]",
    "#chat-widget-button",
    ".chat-launcher",
    "button[class*='chat' i]",
    "button[id*='chat' i]",
];

/// One stage-progress event emitted during discovery (spec.md §4.9: "every
/// stage emits a progress event `{stage, message, optionalData}`").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub message: String,
    pub optional_data: Option<serde_json::Value>,
}

/// Sink progress events are streamed to; `None` disables the stream.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

fn emit(progress: Option<&ProgressSender>, stage: &str, message: impl Into<String>) {
    if let Some(tx) = progress {
        let _ = tx.send(ProgressEvent {
            stage: stage.to_string(),
            message: message.into(),
            optional_data: None,
        });
    }
}

/// A scripted primitive for [`WidgetStrategy::Steps`] (spec.md §4.9 step 5).
#[derive(Debug, Clone)]
pub enum WidgetStep {
    Click(String),
    Type(String, String),
    Wait(Duration),
    WaitForSelector(String),
    Evaluate(String),
}

/// How discovery locates the chat widget (spec.md §4.9 step 5).
#[derive(Debug, Clone, Default)]
pub enum WidgetStrategy {
    /// Hint-derived selectors, then the generic fallback list.
    #[default]
    Heuristic,
    /// Click one caller-supplied CSS selector directly.
    Selector(String),
    /// Run an ordered script of primitives.
    Steps(Vec<WidgetStep>),
}

/// Tunables a caller may override per discovery run (spec.md §4.9 steps
/// 5-6). Defaults match the spec's documented defaults.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub widget_strategy: WidgetStrategy,
    /// Regex the discovered WebSocket's URL must match; `None` accepts any.
    pub ws_url_pattern: Option<String>,
    /// Index among URL-matching candidates to select (spec.md §4.9 step 6).
    pub ws_match_index: usize,
    /// Minimum number of frames to observe before classification proceeds.
    pub min_frame_count: usize,
    pub progress: Option<ProgressSender>,
}

impl DiscoveryOptions {
    fn min_frame_count_or_default(&self) -> usize {
        if self.min_frame_count == 0 {
            2
        } else {
            self.min_frame_count
        }
    }
}

/// Accumulates WebSocket-creation/handshake events observed between the
/// time capture listeners are attached and the time a candidate socket is
/// selected, so headers that arrive out of order relative to
/// `websocketCreated` are never lost (spec.md §4.9 step 2: "backfilling
/// headers when they arrive later").
#[derive(Default)]
struct CreationLedger {
    /// Every observed websocket URL, in arrival order (may contain
    /// duplicates if a widget opens and recreates a socket).
    urls: Vec<String>,
    /// request id -> websocket url, for correlating captured headers.
    url_by_request: HashMap<String, String>,
    /// request id -> handshake request headers.
    headers_by_request: HashMap<String, HashMap<String, String>>,
}

impl CreationLedger {
    fn record_created(&mut self, event: &EventWebSocketCreated) {
        let request_id = format!("{:?}", event.request_id);
        self.url_by_request.insert(request_id, event.url.clone());
        self.urls.push(event.url.clone());
    }

    fn record_handshake(&mut self, event: &EventWebSocketWillSendHandshakeRequest) {
        let request_id = format!("{:?}", event.request_id);
        let headers = serde_json::to_value(&event.request.headers)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .map(|obj| {
                obj.into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();
        self.headers_by_request.insert(request_id, headers);
    }

    fn headers_for(&self, url: &str) -> HashMap<String, String> {
        self.url_by_request
            .iter()
            .find(|(_, candidate_url)| candidate_url.as_str() == url)
            .and_then(|(request_id, _)| self.headers_by_request.get(request_id))
            .cloned()
            .unwrap_or_default()
    }
}

/// Runs the full discovery pipeline against `page_url` with default
/// options, for callers (the token-refresh scheduler's discoverer
/// adapter) that have no per-target widget configuration to pass in.
pub async fn discover(page_url: &str) -> KrawallResult<DiscoveryResult> {
    discover_with_options(page_url, &DiscoveryOptions::default()).await
}

/// Runs the full discovery pipeline against `page_url` (spec.md §4.9):
/// launch-or-reuse the browser, attach capture, navigate, dismiss cookie
/// banners, detect the widget, wait for its WebSocket, classify the
/// protocol, extract credentials, and assemble the result.
pub async fn discover_with_options(
    page_url: &str,
    options: &DiscoveryOptions,
) -> KrawallResult<DiscoveryResult> {
    let progress = options.progress.as_ref();
    let browser = shared_browser(&LaunchConfig::default()).await?;
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "page".into(),
            context: e.to_string(),
        })?;

    page.execute(PageEnableParams::default())
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "enable-page".into(),
            context: e.to_string(),
        })?;
    page.execute(EnableParams::default())
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "enable-network".into(),
            context: e.to_string(),
        })?;

    // Capture listeners are attached before navigation (spec.md §4.9 step
    // 2) so nothing the widget does on load is missed.
    let mut created_events = page
        .event_listener::<EventWebSocketCreated>()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "listen-created".into(),
            context: e.to_string(),
        })?;
    let mut sent_events = page
        .event_listener::<EventWebSocketFrameSent>()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "listen-sent".into(),
            context: e.to_string(),
        })?;
    let mut received_events = page
        .event_listener::<EventWebSocketFrameReceived>()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "listen-received".into(),
            context: e.to_string(),
        })?;
    let mut closed_events = page
        .event_listener::<EventWebSocketClosed>()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "listen-closed".into(),
            context: e.to_string(),
        })?;
    let mut handshake_events = page
        .event_listener::<EventWebSocketWillSendHandshakeRequest>()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "listen-handshake".into(),
            context: e.to_string(),
        })?;

    emit(progress, "navigate", format!("loading {page_url}"));
    page.goto(page_url)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "navigate".into(),
            context: format!("{page_url}: {e}"),
        })?;
    let _ = page.wait_for_navigation().await;

    emit(progress, "cookie-banner", "checking for a consent banner");
    for selector in COOKIE_BANNER_SELECTORS {
        if try_click_selector(&page, selector).await.unwrap_or(false) {
            emit(progress, "cookie-banner", format!("dismissed consent banner via {selector}"));
            tokio::time::sleep(COOKIE_BANNER_SETTLE).await;
            break;
        }
    }

    let mut ledger = CreationLedger::default();
    let mut selectors_tried: Vec<&str> = Vec::new();

    emit(progress, "widget-detect", "locating chat widget");
    match &options.widget_strategy {
        WidgetStrategy::Heuristic => {
            'selectors: for selector in GENERIC_WIDGET_SELECTORS {
                selectors_tried.push(selector);
                if !try_click_selector(&page, selector).await.unwrap_or(false) {
                    continue;
                }
                emit(progress, "widget-detect", format!("clicked {selector}"));
                let deadline = tokio::time::Instant::now() + WIDGET_CLICK_WINDOW;
                loop {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(remaining) => break,
                        Some(event) = created_events.next() => ledger.record_created(&event),
                        Some(event) = handshake_events.next() => ledger.record_handshake(&event),
                        else => break,
                    }
                }
                if !ledger.urls.is_empty() {
                    break 'selectors;
                }
            }
        }
        WidgetStrategy::Selector(selector) => {
            selectors_tried.push(selector.as_str());
            if try_click_selector(&page, selector).await.unwrap_or(false) {
                emit(progress, "widget-detect", format!("clicked {selector}"));
            }
        }
        WidgetStrategy::Steps(steps) => {
            for step in steps {
                run_widget_step(&page, step).await;
            }
        }
    }

    if ledger.urls.is_empty() {
        let deadline = tokio::time::Instant::now() + WEBSOCKET_WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining) => break,
                Some(event) = created_events.next() => ledger.record_created(&event),
                Some(event) = handshake_events.next() => ledger.record_handshake(&event),
                else => break,
            }
        }
    }

    if ledger.urls.is_empty() {
        let context = failure_context(&page, page_url, &selectors_tried).await;
        let _ = page.close().await;
        return Err(KrawallError::DiscoveryFailed {
            stage: "widget".into(),
            context,
        });
    }

    let wss_url = select_ws_url(&ledger.urls, options)?;
    info!(url = %wss_url, "discovered widget WebSocket");
    emit(progress, "websocket", format!("selected {wss_url}"));

    let mut captured_frames = Vec::new();
    let min_frames = options.min_frame_count_or_default();
    let mut capture_deadline = tokio::time::Instant::now() + CAPTURE_WINDOW;
    let hard_capture_deadline = tokio::time::Instant::now() + CAPTURE_WINDOW + MAX_CAPTURE_EXTENSION;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(capture_deadline) => {
                if captured_frames.len() < min_frames && tokio::time::Instant::now() < hard_capture_deadline {
                    capture_deadline = tokio::time::Instant::now() + CAPTURE_WINDOW;
                    continue;
                }
                break;
            }
            Some(event) = sent_events.next() => {
                captured_frames.push(CapturedFrame {
                    direction: FrameDirection::Sent,
                    data: event.response.payload_data.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            Some(event) = received_events.next() => {
                captured_frames.push(CapturedFrame {
                    direction: FrameDirection::Received,
                    data: event.response.payload_data.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            Some(event) = handshake_events.next() => {
                ledger.record_handshake(&event);
            }
            Some(_) = closed_events.next() => {
                warn!("widget WebSocket closed during discovery capture window");
                break;
            }
        }
    }

    if captured_frames.len() < min_frames {
        warn!(
            captured = captured_frames.len(),
            required = min_frames,
            "discovery capture window ended before the minimum frame count was observed"
        );
    }

    emit(progress, "extract", "reading cookies and storage");
    let (cookies, local_storage, session_storage) = capture_page_state(&page).await?;
    let headers = ledger.headers_for(&wss_url);

    emit(progress, "classify", "classifying wire protocol");
    let (detected_protocol, socket_io_config) = classify(page_url, &captured_frames);

    let _ = page.close().await;

    Ok(DiscoveryResult {
        wss_url,
        cookies,
        headers,
        local_storage,
        session_storage,
        captured_frames,
        detected_protocol,
        socket_io_config,
        discovered_at: chrono::Utc::now(),
    })
}

async fn run_widget_step(page: &Page, step: &WidgetStep) {
    match step {
        WidgetStep::Click(selector) => {
            let _ = try_click_selector(page, selector).await;
        }
        WidgetStep::Type(selector, text) => {
            if focus_selector(page, selector).await.unwrap_or(false) {
                type_text(page, text).await;
            }
        }
        WidgetStep::Wait(duration) => tokio::time::sleep(*duration).await,
        WidgetStep::WaitForSelector(selector) => {
            let deadline = tokio::time::Instant::now() + WIDGET_CLICK_WINDOW;
            while tokio::time::Instant::now() < deadline {
                if locate_selector(page, selector).await.ok().flatten().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        WidgetStep::Evaluate(script) => {
            let _ = page.evaluate(script.as_str()).await;
        }
    }
}

/// Applies the URL-regex filter and match-index selection over every
/// WebSocket URL observed during discovery (spec.md §4.9 step 6).
fn select_ws_url(urls: &[String], options: &DiscoveryOptions) -> KrawallResult<String> {
    let candidates: Vec<&String> = match &options.ws_url_pattern {
        Some(pattern) => {
            let re = regex_lite::Regex::new(pattern)
                .map_err(|e| KrawallError::config(format!("invalid wsUrlPattern: {e}")))?;
            urls.iter().filter(|u| re.is_match(u)).collect()
        }
        None => urls.iter().collect(),
    };
    candidates
        .get(options.ws_match_index)
        .map(|s| (*s).clone())
        .ok_or_else(|| KrawallError::DiscoveryFailed {
            stage: "widget".into(),
            context: format!(
                "no captured websocket matched index {} of pattern {:?} (observed: {urls:?})",
                options.ws_match_index, options.ws_url_pattern
            ),
        })
}

async fn failure_context(page: &Page, page_url: &str, selectors_tried: &[&str]) -> String {
    let title = page
        .evaluate("document.title")
        .await
        .ok()
        .and_then(|r| r.into_value::<String>().ok())
        .unwrap_or_default();
    let iframe_count = page
        .evaluate("document.querySelectorAll('iframe').length")
        .await
        .ok()
        .and_then(|r| r.into_value::<u64>().ok())
        .unwrap_or(0);
    format!(
        "page_url={page_url}, title={title:?}, iframe_count={iframe_count}, selectors_tried={selectors_tried:?}"
    )
}

/// Locates `selector` by evaluating a same-origin DOM search (including
/// same-origin iframe content documents; cross-origin iframe content is
/// not reachable from here) and returns its viewport center if found and
/// visible.
async fn locate_selector(page: &Page, selector: &str) -> KrawallResult<Option<(f64, f64)>> {
    let encoded = serde_json::to_string(selector)?;
    let js = format!(
        r#"(() => {{
            function visible(el) {{
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                return rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';
            }}
            function search(doc) {{
                const el = doc.querySelector({encoded});
                if (el && visible(el)) return el;
                for (const frame of doc.querySelectorAll('iframe')) {{
                    try {{
                        const found = search(frame.contentDocument);
                        if (found) return found;
                    }} catch (e) {{ /* cross-origin, unreachable */ }}
                }}
                return null;
            }}
            const el = search(document);
            if (!el) return null;
            const rect = el.getBoundingClientRect();
            return {{ centerX: rect.x + rect.width / 2, centerY: rect.y + rect.height / 2 }};
        }})()"#
    );
    let value: serde_json::Value = page
        .evaluate(js)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "widget-detect".into(),
            context: e.to_string(),
        })?
        .into_value()
        .unwrap_or(serde_json::Value::Null);
    if value.is_null() {
        return Ok(None);
    }
    let x = value["centerX"].as_f64();
    let y = value["centerY"].as_f64();
    Ok(x.zip(y))
}

async fn click_at(page: &Page, x: f64, y: f64) -> KrawallResult<()> {
    let press = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MousePressed)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(|e| KrawallError::config(format!("invalid mouse event: {e}")))?;
    page.execute(press)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed { stage: "widget-detect".into(), context: e.to_string() })?;

    let release = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MouseReleased)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(|e| KrawallError::config(format!("invalid mouse event: {e}")))?;
    page.execute(release)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed { stage: "widget-detect".into(), context: e.to_string() })?;
    Ok(())
}

async fn try_click_selector(page: &Page, selector: &str) -> KrawallResult<bool> {
    match locate_selector(page, selector).await? {
        Some((x, y)) => {
            click_at(page, x, y).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn focus_selector(page: &Page, selector: &str) -> KrawallResult<bool> {
    let encoded = serde_json::to_string(selector)?;
    let js = format!(
        r#"(() => {{ const el = document.querySelector({encoded}); if (!el) return false; el.focus(); return true; }})()"#
    );
    let value: serde_json::Value = page
        .evaluate(js)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed { stage: "widget-detect".into(), context: e.to_string() })?
        .into_value()
        .unwrap_or(serde_json::Value::Bool(false));
    Ok(value.as_bool().unwrap_or(false))
}

async fn type_text(page: &Page, text: &str) {
    for c in text.chars() {
        let key_down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .text(c.to_string())
            .build();
        if let Ok(key_down) = key_down {
            let _ = page.execute(key_down).await;
        }
        let key_up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .text(c.to_string())
            .build();
        if let Ok(key_up) = key_up {
            let _ = page.execute(key_up).await;
        }
    }
}

async fn capture_page_state(
    page: &Page,
) -> KrawallResult<(
    Vec<Cookie>,
    HashMap<String, String>,
    HashMap<String, String>,
)> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "cookies".into(),
            context: e.to_string(),
        })?
        .into_iter()
        .map(|c| Cookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
        })
        .collect();

    let local_storage = read_storage(page, "localStorage").await.unwrap_or_default();
    let session_storage = read_storage(page, "sessionStorage").await.unwrap_or_default();

    Ok((cookies, local_storage, session_storage))
}

async fn read_storage(page: &Page, storage: &str) -> KrawallResult<HashMap<String, String>> {
    let script = format!(
        "Object.fromEntries(Object.entries(window.{storage}).map(([k, v]) => [k, String(v)]))"
    );
    let value: serde_json::Value = page
        .evaluate(script)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: storage.to_string(),
            context: e.to_string(),
        })?
        .into_value()
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: storage.to_string(),
            context: e.to_string(),
        })?;

    let map = value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_ws_url_picks_matching_index() {
        let urls = vec![
            "wss://a.example.com/socket".to_string(),
            "wss://b.example.com/socket".to_string(),
            "wss://widget.example.com/socket".to_string(),
        ];
        let options = DiscoveryOptions {
            ws_url_pattern: Some("widget".to_string()),
            ws_match_index: 0,
            ..Default::default()
        };
        let selected = select_ws_url(&urls, &options).unwrap();
        assert_eq!(selected, "wss://widget.example.com/socket");
    }

    #[test]
    fn select_ws_url_errors_when_nothing_matches() {
        let urls = vec!["wss://a.example.com/socket".to_string()];
        let options = DiscoveryOptions {
            ws_url_pattern: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(select_ws_url(&urls, &options).is_err());
    }

    #[test]
    fn min_frame_count_or_default_falls_back_to_two() {
        let options = DiscoveryOptions::default();
        assert_eq!(options.min_frame_count_or_default(), 2);
        let options = DiscoveryOptions {
            min_frame_count: 5,
            ..Default::default()
        };
        assert_eq!(options.min_frame_count_or_default(), 5);
    }
}
