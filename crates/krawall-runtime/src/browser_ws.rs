//! Browser-mediated WebSocket connector (spec.md §4.12, component C12):
//! composes discovery (C9/C10), the discovery cache (C15), a raw-WS or
//! Socket.IO inner connector (C6/C11), and a refresh subscription (C14)
//! behind the same [`Connector`] contract every other connector exposes.

use crate::cache::DiscoveryCache;
use crate::pubsub::{PubSub, TokenRefreshed};
use crate::scheduler::Discoverer;
use async_trait::async_trait;
use krawall_core::{
    AuthConfig, AuthKind, Connector, DetectedProtocol, DiscoveryResult, HealthCheck, KrawallError,
    KrawallResult, SendMeta, SendOutcome, Target,
};
use krawall_socketio::SocketIoConnector;
use krawall_transport::WsConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn force_fresh(target: &Target) -> bool {
    target
        .protocol_config
        .get("_forceFresh")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn page_url(target: &Target) -> KrawallResult<String> {
    target
        .protocol_config
        .get("pageUrl")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| KrawallError::config("BrowserWS target missing protocolConfig.pageUrl"))
}

/// Builds the inner connector's target from the outer target plus a fresh
/// [`DiscoveryResult`] (spec.md §4.12 step 1): endpoint becomes the
/// discovered WSS URL, auth becomes the captured upgrade headers plus a
/// synthesized `Cookie` header.
fn inner_target(outer: &Target, discovery: &DiscoveryResult) -> Target {
    let mut fields = discovery.headers.clone();
    let cookie_header = discovery.cookie_header();
    if !cookie_header.is_empty() {
        fields.insert("Cookie".to_string(), cookie_header);
    }
    Target {
        id: outer.id.clone(),
        name: outer.name.clone(),
        kind: krawall_core::ConnectorKind::Ws,
        endpoint_url: discovery.wss_url.clone(),
        auth_kind: AuthKind::CustomHeader,
        auth_config: AuthConfig { fields },
        request_template: outer.request_template.clone(),
        response_template: outer.response_template.clone(),
        protocol_config: serde_json::json!({
            "cookieHeader": discovery.cookie_header(),
        }),
        active: outer.active,
        last_test_at: outer.last_test_at,
        last_test_outcome: outer.last_test_outcome.clone(),
    }
}

struct Session {
    connector: Arc<dyn Connector>,
    /// Present only in raw mode: the concrete connector a refresh
    /// notification can hot-swap without disturbing the open socket
    /// (spec.md §4.12 step 4). Socket.IO mode has no such hook — a
    /// refresh notification there is picked up lazily on the next
    /// rediscovery-driven reconnect instead.
    raw: Option<Arc<WsConnector>>,
    discovery: DiscoveryResult,
    discovered_at: chrono::DateTime<chrono::Utc>,
}

struct Shared {
    target: Target,
    cache: Arc<DiscoveryCache>,
    discoverer: Arc<dyn Discoverer>,
    discovery_ttl: Duration,
    session_max_age: Duration,
    session: RwLock<Option<Session>>,
}

/// Composed browser-mediated WebSocket connector (spec.md §4.12).
pub struct BrowserWsConnector {
    shared: Arc<Shared>,
    refresh_task: Option<JoinHandle<()>>,
}

impl BrowserWsConnector {
    /// `pubsub` is `None` when refresh notifications are disabled for this
    /// target; `session_max_age` controls how stale a discovery result may
    /// be before a failed health check triggers rediscovery.
    pub fn new(
        target: Target,
        cache: Arc<DiscoveryCache>,
        discoverer: Arc<dyn Discoverer>,
        pubsub: Option<Arc<dyn PubSub>>,
        discovery_ttl: Duration,
        session_max_age: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            target,
            cache,
            discoverer,
            discovery_ttl,
            session_max_age,
            session: RwLock::new(None),
        });

        let refresh_task = pubsub.map(|pubsub| {
            let shared = shared.clone();
            tokio::spawn(async move { run_refresh_subscription(shared, pubsub).await })
        });

        Self { shared, refresh_task }
    }

    async fn discover_and_build(&self) -> KrawallResult<Session> {
        build_session(&self.shared).await
    }
}

impl Drop for BrowserWsConnector {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.take() {
            handle.abort();
        }
    }
}

async fn build_session(shared: &Shared) -> KrawallResult<Session> {
    let url = page_url(&shared.target)?;
    let cached = if force_fresh(&shared.target) {
        None
    } else {
        shared.cache.get(shared.target.id.0.as_str()).await
    };

    let discovery = match cached {
        Some(discovery) => discovery,
        None => {
            let discovery = shared.discoverer.discover(&url).await?;
            shared.cache.put(shared.target.id.0.as_str(), &discovery, shared.discovery_ttl).await;
            discovery
        }
    };

    let inner = inner_target(&shared.target, &discovery);

    let (connector, raw): (Arc<dyn Connector>, Option<Arc<WsConnector>>) =
        match discovery.detected_protocol {
            DetectedProtocol::SocketIo => {
                let socket_io = Arc::new(SocketIoConnector::new(inner)?);
                (socket_io, None)
            }
            DetectedProtocol::Raw => {
                let ws = Arc::new(WsConnector::new_no_reconnect(inner));
                (ws.clone(), Some(ws))
            }
        };

    connector.connect().await?;

    Ok(Session {
        connector,
        raw,
        discovery,
        discovered_at: chrono::Utc::now(),
    })
}

#[async_trait]
impl Connector for BrowserWsConnector {
    async fn connect(&self) -> KrawallResult<()> {
        {
            let session = self.shared.session.read().await;
            if let Some(session) = session.as_ref() {
                if session.connector.is_connected().await {
                    return Ok(());
                }
            }
        }
        let session = self.discover_and_build().await?;
        *self.shared.session.write().await = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> KrawallResult<()> {
        if let Some(session) = self.shared.session.write().await.take() {
            session.connector.disconnect().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.shared.session.read().await.as_ref() {
            Some(session) => session.connector.is_connected().await,
            None => false,
        }
    }

    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome> {
        let connector = {
            let session = self.shared.session.read().await;
            session.as_ref().map(|s| s.connector.clone())
        };
        match connector {
            Some(connector) => connector.send(msg, meta).await,
            None => Err(KrawallError::NotConnected),
        }
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn health_check(&self) -> KrawallResult<HealthCheck> {
        let (connector, stale) = {
            let session = self.shared.session.read().await;
            match session.as_ref() {
                Some(session) => {
                    let stale = chrono::Utc::now() - session.discovered_at
                        > chrono::Duration::from_std(self.shared.session_max_age).unwrap_or_default();
                    (Some(session.connector.clone()), stale)
                }
                None => (None, false),
            }
        };

        let Some(connector) = connector else {
            return Err(KrawallError::NotConnected);
        };

        let check = connector.health_check().await?;
        if check.healthy || !stale {
            return Ok(check);
        }

        info!(target = %self.shared.target.id, "discovery result stale and connector unhealthy, rediscovering");
        if let Some(session) = self.shared.session.write().await.take() {
            let _ = session.connector.disconnect().await;
        }
        match self.discover_and_build().await {
            Ok(session) => {
                let healthy_again = session.connector.health_check().await;
                *self.shared.session.write().await = Some(session);
                healthy_again
            }
            Err(e) => {
                warn!(target = %self.shared.target.id, error = %e, "rediscovery after unhealthy check failed");
                Ok(check)
            }
        }
    }
}

/// Applies a `token-refreshed` notification for this connector's target:
/// reads the updated discovery result from the cache and, in raw mode,
/// hot-swaps it onto the inner connector for the next reconnect without
/// touching the currently open socket (spec.md §4.12 step 4).
async fn run_refresh_subscription(shared: Arc<Shared>, pubsub: Arc<dyn PubSub>) {
    let mut events = pubsub.subscribe();
    loop {
        let event: TokenRefreshed = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        if event.target_id != shared.target.id.0 {
            continue;
        }
        let Some(discovery) = shared.cache.get(&shared.target.id.0).await else {
            continue;
        };
        let session = shared.session.read().await;
        let Some(session) = session.as_ref() else { continue };
        let Some(raw) = session.raw.as_ref() else {
            info!(target = %shared.target.id, "refresh notification ignored: Socket.IO mode picks it up on next rediscovery");
            continue;
        };
        let inner = inner_target(&shared.target, &discovery);
        let headers = krawall_core::build_auth_headers(inner.auth_kind, &inner.auth_config);
        raw.set_reconnect_override(inner.endpoint_url, headers).await;
        info!(target = %shared.target.id, "applied refreshed credentials to next reconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{InMemoryPubSub, RefreshTrigger};
    use crate::store::InMemoryStore;
    use krawall_core::{RequestTemplate, ResponseTemplate, ResponseTransform, TargetId};
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    fn target(page_url: &str) -> Target {
        Target {
            id: TargetId::from("bws1"),
            name: "widget".into(),
            kind: krawall_core::ConnectorKind::BrowserWs,
            endpoint_url: String::new(),
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
            protocol_config: serde_json::json!({"pageUrl": page_url}),
            active: true,
            last_test_at: None,
            last_test_outcome: None,
        }
    }

    struct FakeDiscoverer {
        wss_url: String,
    }

    #[async_trait]
    impl Discoverer for FakeDiscoverer {
        async fn discover(&self, _page_url: &str) -> KrawallResult<DiscoveryResult> {
            Ok(DiscoveryResult {
                wss_url: self.wss_url.clone(),
                cookies: Vec::new(),
                headers: HashMap::new(),
                local_storage: HashMap::new(),
                session_storage: HashMap::new(),
                captured_frames: Vec::new(),
                detected_protocol: DetectedProtocol::Raw,
                socket_io_config: None,
                discovered_at: chrono::Utc::now(),
            })
        }
    }

    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            use futures::{SinkExt, StreamExt};
            while let Some(Ok(msg)) = rx.next().await {
                if msg.is_text() {
                    let value: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
                    let reply = serde_json::json!({"reply": value["text"]});
                    let _ = tx.send(Message::Text(reply.to_string().into())).await;
                }
            }
        });
        format!("ws://{addr}")
    }

    fn store_and_cache() -> Arc<DiscoveryCache> {
        Arc::new(DiscoveryCache::new(Arc::new(InMemoryStore::new())))
    }

    #[tokio::test]
    async fn connect_discovers_and_opens_the_inner_raw_connector() {
        let url = spawn_echo_server().await;
        let discoverer: Arc<dyn Discoverer> = Arc::new(FakeDiscoverer { wss_url: url });
        let connector = BrowserWsConnector::new(
            target("https://example.com/chat"),
            store_and_cache(),
            discoverer,
            None,
            Duration::from_secs(300),
            Duration::from_secs(300),
        );
        connector.connect().await.unwrap();
        assert!(connector.is_connected().await);

        let outcome = connector.send("hello", SendMeta::default()).await.unwrap();
        assert_eq!(outcome.content, "hello");
    }

    #[tokio::test]
    async fn refresh_notification_hot_swaps_without_disrupting_the_open_connection() {
        let url = spawn_echo_server().await;
        let discoverer: Arc<dyn Discoverer> = Arc::new(FakeDiscoverer { wss_url: url.clone() });
        let cache = store_and_cache();
        let pubsub: Arc<dyn PubSub> = Arc::new(InMemoryPubSub::new());

        let connector = BrowserWsConnector::new(
            target("https://example.com/chat"),
            cache.clone(),
            discoverer,
            Some(pubsub.clone()),
            Duration::from_secs(300),
            Duration::from_secs(300),
        );
        connector.connect().await.unwrap();

        cache
            .put(
                "bws1",
                &DiscoveryResult {
                    wss_url: url,
                    cookies: Vec::new(),
                    headers: HashMap::from([("Authorization".to_string(), "Bearer new".to_string())]),
                    local_storage: HashMap::new(),
                    session_storage: HashMap::new(),
                    captured_frames: Vec::new(),
                    detected_protocol: DetectedProtocol::Raw,
                    socket_io_config: None,
                    discovered_at: chrono::Utc::now(),
                },
                Duration::from_secs(300),
            )
            .await;
        pubsub
            .publish(TokenRefreshed {
                target_id: "bws1".into(),
                triggered_by: RefreshTrigger::Scheduled,
                timestamp: chrono::Utc::now(),
            })
            .await;

        // Give the refresh-subscription task a turn to process the event.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The still-open connection keeps working unaffected by the swap.
        let outcome = connector.send("still alive", SendMeta::default()).await.unwrap();
        assert_eq!(outcome.content, "still alive");
    }
}
