//! Socket.IO connector (spec.md §4.11/§4.12, components C11/C12).
//!
//! Dials the WebSocket discovered by `krawall-browser` directly — no
//! browser involved from here on — replays the Engine.IO handshake,
//! joins the default namespace, and correlates a send with its reply by
//! registering a one-shot listener for the next incoming Socket.IO
//! event frame (spec.md §4.12 step 2), the same FIFO discipline the raw
//! WS connector uses, rather than ack-id correlation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use krawall_core::{
    build_request, extract_error, extract_response, extract_tokens, Connector, HealthCheck,
    KrawallError, KrawallResult, SendMeta, SendOutcome, Target,
};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::frame::{decode_engine_io, decode_socket_io, encode_connect, encode_event, encode_pong};
use crate::frame::{EngineIoPacket, SocketIoPacket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;
/// WebSocket close code used when the heartbeat safety timer expires
/// without a ping or pong (spec.md §4.11).
const HEARTBEAT_EXPIRED_CLOSE_CODE: u16 = 4000;

/// Reply to an event-correlated send: the event name and payload of the
/// next Socket.IO event frame received after the request was written.
type EventReply = (String, serde_json::Value);

/// `protocolConfig` fields a Socket.IO target carries, typically copied
/// from the `SocketIoConfig` a discovery run produced (spec.md §4.12).
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketIoProtocolConfig {
    #[serde(default)]
    cookie_header: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Open,
    Closed,
}

struct Inner {
    target: Target,
    state: RwLock<ConnState>,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Message>>>,
    pending: Mutex<VecDeque<(u64, oneshot::Sender<EventReply>)>>,
    next_pending_id: AtomicU64,
}

/// Socket.IO connector implementation (spec.md §4.11/§4.12).
pub struct SocketIoConnector {
    inner: Arc<Inner>,
    protocol_config: SocketIoProtocolConfig,
}

impl SocketIoConnector {
    pub fn new(target: Target) -> KrawallResult<Self> {
        let protocol_config: SocketIoProtocolConfig = if target.protocol_config.is_null() {
            SocketIoProtocolConfig::default()
        } else {
            serde_json::from_value(target.protocol_config.clone())
                .map_err(|e| KrawallError::config(format!("invalid protocolConfig: {e}")))?
        };
        Ok(Self {
            inner: Arc::new(Inner {
                target,
                state: RwLock::new(ConnState::Idle),
                outbound: Mutex::new(None),
                pending: Mutex::new(VecDeque::new()),
                next_pending_id: AtomicU64::new(0),
            }),
            protocol_config,
        })
    }

    /// Drops the pending listener for `pending_id` without resolving it,
    /// so a timed-out send doesn't leave a stale head in the queue that
    /// would steal the reply meant for the next send.
    async fn remove_pending(&self, pending_id: u64) {
        self.inner
            .pending
            .lock()
            .await
            .retain(|(id, _)| *id != pending_id);
    }
}

async fn dial(url: &str, cookie_header: Option<&str>) -> KrawallResult<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| KrawallError::config(format!("invalid WebSocket url: {e}")))?;
    if let Some(cookies) = cookie_header {
        request.headers_mut().insert(
            HeaderName::from_static("cookie"),
            HeaderValue::from_str(cookies)
                .map_err(|e| KrawallError::config(format!("invalid cookie header: {e}")))?,
        );
    }
    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| KrawallError::transport(e.to_string()))?;
    Ok(stream)
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self) -> KrawallResult<()> {
        if *self.inner.state.read().await == ConnState::Open {
            return Ok(());
        }

        let mut stream = dial(
            &self.inner.target.endpoint_url,
            self.protocol_config.cookie_header.as_deref(),
        )
        .await?;

        let heartbeat_timeout = match stream.next().await {
            Some(Ok(Message::Text(text))) => match decode_engine_io(&text) {
                Some(EngineIoPacket::Open(handshake)) => {
                    let ping_interval = handshake["pingInterval"]
                        .as_u64()
                        .unwrap_or(DEFAULT_PING_INTERVAL_MS);
                    let ping_timeout = handshake["pingTimeout"]
                        .as_u64()
                        .unwrap_or(DEFAULT_PING_TIMEOUT_MS);
                    Duration::from_millis(ping_interval + ping_timeout)
                }
                other => {
                    return Err(KrawallError::protocol(format!(
                        "expected Engine.IO open frame, got {other:?}"
                    )))
                }
            },
            other => {
                return Err(KrawallError::protocol(format!(
                    "expected Engine.IO open frame, got {other:?}"
                )))
            }
        };

        stream
            .send(Message::Text(encode_connect().into()))
            .await
            .map_err(|e| KrawallError::transport(e.to_string()))?;

        let (ws_tx, ws_rx) = stream.split();
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        *self.inner.outbound.lock().await = Some(outbound_tx);
        *self.inner.state.write().await = ConnState::Open;

        info!(target = %self.inner.target.id, "Socket.IO connector open");
        tokio::spawn(run_loop(
            self.inner.clone(),
            ws_tx,
            ws_rx,
            outbound_rx,
            heartbeat_timeout,
        ));

        Ok(())
    }

    async fn disconnect(&self) -> KrawallResult<()> {
        self.inner.outbound.lock().await.take();
        *self.inner.state.write().await = ConnState::Closed;
        self.inner.pending.lock().await.clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.inner.state.read().await == ConnState::Open
    }

    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }

        let mut template = self.inner.target.request_template.clone();
        template.variables.extend(meta.variables.clone());
        let body = build_request(msg, &template);

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending_id = self.inner.next_pending_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.lock().await.push_back((pending_id, reply_tx));

        let outbound = self.inner.outbound.lock().await.clone();
        let Some(outbound) = outbound else {
            self.remove_pending(pending_id).await;
            return Err(KrawallError::NotConnected);
        };

        let started = Instant::now();
        let frame = encode_event("message", &body);
        if outbound.send(Message::Text(frame.into())).is_err() {
            self.remove_pending(pending_id).await;
            return Err(KrawallError::transport("Socket.IO sender closed"));
        }

        let (_event, payload) = match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(KrawallError::transport("Socket.IO connector dropped pending request"));
            }
            Err(_) => {
                self.remove_pending(pending_id).await;
                return Err(KrawallError::transport("Socket.IO request timed out"));
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let content = extract_response(&payload, &self.inner.target.response_template)?;
        let tokens = extract_tokens(&payload, &self.inner.target.response_template);
        let error = extract_error(&payload, &self.inner.target.response_template);

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
        Ok(HealthCheck::ok(0))
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    mut outbound_rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
    heartbeat_timeout: Duration,
) {
    let mut deadline = tokio::time::Instant::now() + heartbeat_timeout;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            warn!(target = %inner.target.id, error = %e, "failed to send Socket.IO frame");
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if matches!(decode_engine_io(&text), Some(EngineIoPacket::Ping) | Some(EngineIoPacket::Pong)) {
                            deadline = tokio::time::Instant::now() + heartbeat_timeout;
                        }
                        handle_frame(&inner, &mut ws_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(target = %inner.target.id, error = %e, "Socket.IO read error");
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(target = %inner.target.id, "Socket.IO heartbeat expired, closing");
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Other(HEARTBEAT_EXPIRED_CLOSE_CODE),
                        reason: "heartbeat timeout".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    *inner.state.write().await = ConnState::Closed;
    inner.outbound.lock().await.take();
    inner.pending.lock().await.clear();
}

async fn handle_frame(inner: &Arc<Inner>, ws_tx: &mut WsSink, text: &str) {
    match decode_engine_io(text) {
        Some(EngineIoPacket::Ping) => {
            let _ = ws_tx.send(Message::Text(encode_pong().into())).await;
        }
        Some(EngineIoPacket::Message(payload)) => match decode_socket_io(&payload) {
            Some(SocketIoPacket::Event { event, data, .. }) => {
                if let Some((_, slot)) = inner.pending.lock().await.pop_front() {
                    let _ = slot.send((event, data));
                }
            }
            Some(SocketIoPacket::Error(err)) => {
                warn!(target = %inner.target.id, error = %err, "Socket.IO error packet");
            }
            _ => {}
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krawall_core::{
        AuthConfig, AuthKind, ConnectorKind, RequestTemplate, ResponseTemplate, ResponseTransform,
        TargetId,
    };
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn target(endpoint_url: String) -> Target {
        Target {
            id: TargetId::from("sio1"),
            name: "socket.io target".into(),
            kind: ConnectorKind::BrowserWs,
            endpoint_url,
            auth_kind: AuthKind::None,
            auth_config: AuthConfig::default(),
            request_template: RequestTemplate {
                message_path: "text".into(),
                structure: serde_json::json!({"text": ""}),
                variables: HashMap::new(),
            },
            response_template: ResponseTemplate {
                response_path: "reply".into(),
                token_usage_path: None,
                error_path: None,
                transform: ResponseTransform::None,
            },
            protocol_config: serde_json::Value::Null,
            active: true,
            last_test_at: None,
            last_test_outcome: None,
        }
    }

    async fn spawn_socket_io_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();

            tx.send(Message::Text(
                r#"0{"sid":"srv1","pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .await
            .unwrap();

            while let Some(Ok(Message::Text(text))) = rx.next().await {
                match decode_engine_io(&text) {
                    Some(EngineIoPacket::Message(payload)) if payload.starts_with('0') => {
                        let _ = tx.send(Message::Text("40".into())).await;
                    }
                    Some(EngineIoPacket::Message(payload)) => {
                        if let Some(SocketIoPacket::Event { data, .. }) = decode_socket_io(&payload) {
                            let reply = serde_json::json!({"reply": data["text"]});
                            let frame = encode_event("reply", &reply);
                            let _ = tx.send(Message::Text(frame.into())).await;
                        }
                    }
                    _ => {}
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn send_before_connect_fails_not_connected() {
        let connector = SocketIoConnector::new(target("ws://127.0.0.1:1".into())).unwrap();
        let err = connector.send("hi", SendMeta::default()).await.unwrap_err();
        assert!(matches!(err, KrawallError::NotConnected));
    }

    #[tokio::test]
    async fn send_resolves_on_next_event_frame() {
        let url = spawn_socket_io_server().await;
        let connector = SocketIoConnector::new(target(url)).unwrap();
        connector.connect().await.unwrap();

        let outcome = connector.send("hello", SendMeta::default()).await.unwrap();
        assert_eq!(outcome.content, "hello");
    }

    #[tokio::test]
    async fn missing_heartbeat_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            tx.send(Message::Text(
                r#"0{"sid":"srv1","pingInterval":10,"pingTimeout":10}"#.into(),
            ))
            .await
            .unwrap();
            // Never pings again; the client's safety timer should expire
            // and close the connection on its own.
            while rx.next().await.is_some() {}
        });

        let connector = SocketIoConnector::new(target(format!("ws://{addr}"))).unwrap();
        connector.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!connector.is_connected().await);
    }
}
