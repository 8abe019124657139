//! Raw WebSocket connector (spec.md §4.6, component C6).
//!
//! Requests and responses are correlated positionally: `send` pushes a
//! reply slot onto the back of a FIFO queue before writing to the socket,
//! and the reader loop resolves the front of that queue with whatever
//! frame arrives next. This assumes the remote speaks one reply per
//! request in order, which is the contract every raw-WS chatbot backend
//! in scope here follows (spec.md §4.6 Non-goals rule out interleaved
//! multi-turn protocols).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use krawall_core::{
    build_auth_headers, build_auth_query_params, build_request, extract_error, extract_response,
    extract_tokens, AuthHeaders, Connector, HealthCheck, KrawallError, KrawallResult, SendMeta,
    SendOutcome, Target,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BACKOFF_UNIT: Duration = Duration::from_secs(2);

/// Connection lifecycle (spec.md §4.6): `Idle` -> `Connecting` -> `Open`,
/// with `(Reconnecting -> Open)*` on transport failure, terminating in
/// `Closed` once reconnect attempts are exhausted or `disconnect` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WsState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

struct Inner {
    target: Target,
    state: RwLock<WsState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<VecDeque<(u64, oneshot::Sender<serde_json::Value>)>>,
    pending_pongs: Mutex<VecDeque<oneshot::Sender<()>>>,
    next_pending_id: AtomicU64,
    max_reconnect_attempts: u32,
    /// Endpoint/header override applied on the *next* dial, without
    /// disturbing an in-flight connection (spec.md §4.12 step 4: a
    /// refresh hot-swap never interrupts active sends).
    reconnect_override: RwLock<Option<(String, AuthHeaders)>>,
}

/// WebSocket connector implementation (spec.md §4.6).
pub struct WsConnector {
    inner: Arc<Inner>,
}

impl WsConnector {
    pub fn new(target: Target) -> Self {
        Self::with_reconnect(target, MAX_RECONNECT_ATTEMPTS)
    }

    /// Builds a connector that never auto-reconnects. Used by the
    /// browser-WS composition (spec.md §4.12), which handles failure
    /// recovery itself by re-running discovery rather than retrying the
    /// same stale endpoint.
    pub fn new_no_reconnect(target: Target) -> Self {
        Self::with_reconnect(target, 0)
    }

    fn with_reconnect(target: Target, max_reconnect_attempts: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                state: RwLock::new(WsState::Idle),
                outbound: Mutex::new(None),
                pending: Mutex::new(VecDeque::new()),
                pending_pongs: Mutex::new(VecDeque::new()),
                next_pending_id: AtomicU64::new(0),
                max_reconnect_attempts,
                reconnect_override: RwLock::new(None),
            }),
        }
    }

    /// Overrides the endpoint URL and auth headers used on the next dial
    /// (initial connect or reconnect), leaving any currently open
    /// connection untouched (spec.md §4.12 step 4).
    pub async fn set_reconnect_override(&self, endpoint_url: String, headers: AuthHeaders) {
        *self.inner.reconnect_override.write().await = Some((endpoint_url, headers));
    }

    /// Drops the pending slot for `pending_id` without resolving it, so a
    /// timed-out request doesn't leave a stale head in the FIFO queue that
    /// would otherwise steal the reply meant for the next send.
    async fn remove_pending(&self, pending_id: u64) {
        self.inner
            .pending
            .lock()
            .await
            .retain(|(id, _)| *id != pending_id);
    }
}

async fn dial(url: &str, auth: &AuthHeaders) -> KrawallResult<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| KrawallError::config(format!("invalid WebSocket url: {e}")))?;
    for (name, value) in &auth.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| KrawallError::config(format!("invalid auth header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| KrawallError::config(format!("invalid auth header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| KrawallError::transport(e.to_string()))?;
    Ok(stream)
}

fn append_query(url: &str, params: &[(String, String)]) -> KrawallResult<String> {
    let mut parsed =
        url::Url::parse(url).map_err(|e| KrawallError::config(format!("invalid WebSocket url: {e}")))?;
    {
        let mut pairs = parsed.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(parsed.to_string())
}

/// Dials with the header-based auth first, falling back to query-param
/// auth if the handshake is rejected and a fallback exists (spec.md §4.3).
/// Consults `inner.reconnect_override` first, so a refresh hot-swap takes
/// effect on the next dial without touching an already-open connection.
async fn dial_with_fallback(inner: &Inner) -> KrawallResult<WsStream> {
    if let Some((endpoint_url, headers)) = inner.reconnect_override.read().await.clone() {
        return dial(&endpoint_url, &headers).await;
    }

    let target = &inner.target;
    let auth = build_auth_headers(target.auth_kind, &target.auth_config);
    match dial(&target.endpoint_url, &auth).await {
        Ok(stream) => Ok(stream),
        Err(err) => {
            let query = build_auth_query_params(target.auth_kind, &target.auth_config);
            if query.is_empty() {
                return Err(err);
            }
            let url = append_query(&target.endpoint_url, &query)?;
            dial(&url, &AuthHeaders::default()).await
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> KrawallResult<()> {
        {
            let state = *self.inner.state.read().await;
            if state == WsState::Open {
                return Ok(());
            }
        }
        *self.inner.state.write().await = WsState::Connecting;

        let stream = match dial_with_fallback(&self.inner).await {
            Ok(stream) => stream,
            Err(err) => {
                *self.inner.state.write().await = WsState::Closed;
                return Err(err);
            }
        };

        let (ws_tx, ws_rx) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.inner.outbound.lock().await = Some(outbound_tx);
        *self.inner.state.write().await = WsState::Open;

        info!(target = %self.inner.target.id, "WebSocket connector open");
        tokio::spawn(run_loop(self.inner.clone(), ws_tx, ws_rx, outbound_rx));

        Ok(())
    }

    async fn disconnect(&self) -> KrawallResult<()> {
        self.inner.outbound.lock().await.take();
        *self.inner.state.write().await = WsState::Closed;
        fail_all_pending(&self.inner, "connector disconnected").await;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.inner.state.read().await == WsState::Open
    }

    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }

        let mut template = self.inner.target.request_template.clone();
        template.variables.extend(meta.variables.clone());
        let body = build_request(msg, &template);
        let text = serde_json::to_string(&body)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending_id = self.inner.next_pending_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.lock().await.push_back((pending_id, reply_tx));

        let outbound = self.inner.outbound.lock().await.clone();
        let Some(outbound) = outbound else {
            self.remove_pending(pending_id).await;
            return Err(KrawallError::NotConnected);
        };
        let started = Instant::now();
        if outbound.send(Message::Text(text.into())).is_err() {
            self.remove_pending(pending_id).await;
            return Err(KrawallError::transport("WebSocket sender closed"));
        }

        let raw = match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => {
                return Err(KrawallError::transport("WebSocket connector dropped pending request"));
            }
            Err(_) => {
                self.remove_pending(pending_id).await;
                return Err(KrawallError::transport("WebSocket request timed out"));
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let content = extract_response(&raw, &self.inner.target.response_template)?;
        let tokens = extract_tokens(&raw, &self.inner.target.response_template);
        let error = extract_error(&raw, &self.inner.target.response_template);

        Ok(SendOutcome {
            content,
            tokens,
            error,
            meta,
            latency_ms,
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn health_check(&self) -> KrawallResult<HealthCheck> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }

        let outbound = self.inner.outbound.lock().await.clone();
        let Some(outbound) = outbound else {
            return Err(KrawallError::NotConnected);
        };

        let (pong_tx, pong_rx) = oneshot::channel();
        self.inner.pending_pongs.lock().await.push_back(pong_tx);

        let started = Instant::now();
        if outbound.send(Message::Ping(Vec::new().into())).is_err() {
            return Ok(HealthCheck::unhealthy(0, "WebSocket sender closed"));
        }

        match tokio::time::timeout(Duration::from_secs(5), pong_rx).await {
            Ok(Ok(())) => Ok(HealthCheck::ok(started.elapsed().as_millis() as u64)),
            _ => Ok(HealthCheck::unhealthy(
                started.elapsed().as_millis() as u64,
                "no pong within timeout",
            )),
        }
    }
}

async fn fail_all_pending(inner: &Arc<Inner>, _reason: &str) {
    let mut pending = inner.pending.lock().await;
    while let Some((_, slot)) = pending.pop_front() {
        drop(slot);
    }
    let mut pongs = inner.pending_pongs.lock().await;
    while let Some(slot) = pongs.pop_front() {
        drop(slot);
    }
}

/// Reads frames off the socket, resolving the FIFO-correlated pending
/// request/ping queues, and reconnects on transport failure up to
/// [`MAX_RECONNECT_ATTEMPTS`] times with a linear `attempt * 2s` backoff
/// (spec.md §4.6).
async fn run_loop(
    inner: Arc<Inner>,
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            warn!(target = %inner.target.id, error = %e, "failed to send frame");
                        }
                    }
                    None => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        attempt = 0;
                        resolve_next(&inner, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        attempt = 0;
                        if let Ok(text) = std::str::from_utf8(&data) {
                            resolve_next(&inner, text).await;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(slot) = inner.pending_pongs.lock().await.pop_front() {
                            let _ = slot.send(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if !reconnect(&inner, &mut attempt, &mut ws_tx, &mut ws_rx).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(target = %inner.target.id, error = %e, "WebSocket read error");
                        if !reconnect(&inner, &mut attempt, &mut ws_tx, &mut ws_rx).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    *inner.state.write().await = WsState::Closed;
    inner.outbound.lock().await.take();
    fail_all_pending(&inner, "connection closed").await;
}

async fn resolve_next(inner: &Arc<Inner>, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            // A frame that never gets awaited (server-side heartbeats,
            // telemetry pushes) isn't a protocol violation; only complain
            // when a caller is actually stuck waiting on this frame.
            if !inner.pending.lock().await.is_empty() {
                warn!(target = %inner.target.id, error = %e, "received non-JSON frame");
            }
            return;
        }
    };
    if let Some((_, slot)) = inner.pending.lock().await.pop_front() {
        let _ = slot.send(value);
    } else {
        warn!(target = %inner.target.id, "received frame with no pending request");
    }
}

/// Returns `true` if reconnection succeeded and the loop should continue.
async fn reconnect(
    inner: &Arc<Inner>,
    attempt: &mut u32,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
) -> bool {
    if *attempt >= inner.max_reconnect_attempts {
        warn!(target = %inner.target.id, "max WebSocket reconnect attempts exhausted");
        return false;
    }

    *attempt += 1;
    *inner.state.write().await = WsState::Reconnecting;
    let delay = RECONNECT_BACKOFF_UNIT * *attempt;
    warn!(target = %inner.target.id, attempt = *attempt, delay = ?delay, "reconnecting WebSocket");
    tokio::time::sleep(delay).await;

    match dial_with_fallback(inner).await {
        Ok(stream) => {
            let (new_tx, new_rx) = stream.split();
            *ws_tx = new_tx;
            *ws_rx = new_rx;
            *inner.state.write().await = WsState::Open;
            info!(target = %inner.target.id, "WebSocket reconnected");
            true
        }
        Err(e) => {
            warn!(target = %inner.target.id, error = %e, "WebSocket reconnect attempt failed");
            true
        }
    }
}
