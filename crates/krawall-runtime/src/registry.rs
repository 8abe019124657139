//! Connector registry (spec.md §4.13, component C13): a type-keyed factory
//! that instantiates a connector for a given target. Built-in kinds are
//! registered lazily on first use; duplicate registration overwrites with
//! a warning, matching the teacher's own adapter registry, which never
//! errors on re-registration.

use crate::browser_ws::BrowserWsConnector;
use crate::cache::DiscoveryCache;
use crate::pubsub::PubSub;
use crate::scheduler::Discoverer;
use krawall_core::{Connector, ConnectorKind, KrawallError, KrawallResult, Target};
use krawall_transport::{GrpcConnector, HttpConnector, SseConnector, WsConnector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::warn;

type Factory = Arc<dyn Fn(Target) -> KrawallResult<Box<dyn Connector>> + Send + Sync>;

/// Collaborators the `browser-ws` built-in factory needs beyond a `Target`
/// (spec.md §4.12): discovery cache, refresh pub/sub, and the discoverer
/// seam used for testability.
#[derive(Clone)]
pub struct BrowserWsDeps {
    pub cache: Arc<DiscoveryCache>,
    pub discoverer: Arc<dyn Discoverer>,
    pub pubsub: Option<Arc<dyn PubSub>>,
    pub discovery_ttl: Duration,
    pub session_max_age: Duration,
}

/// Maps a connector kind name to a constructor (spec.md §4.13).
pub struct ConnectorRegistry {
    factories: RwLock<HashMap<String, Factory>>,
    browser_ws_deps: BrowserWsDeps,
    builtins_registered: OnceCell<()>,
}

impl ConnectorRegistry {
    pub fn new(browser_ws_deps: BrowserWsDeps) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            browser_ws_deps,
            builtins_registered: OnceCell::new(),
        }
    }

    /// Registers (or overwrites) the factory for `kind`. A duplicate
    /// registration overwrites the previous entry and logs a warning
    /// rather than erroring (spec.md §4.13/§9).
    pub async fn register(&self, kind: impl Into<String>, factory: Factory) {
        let kind = kind.into();
        let mut factories = self.factories.write().await;
        if factories.insert(kind.clone(), factory).is_some() {
            warn!(kind, "connector kind re-registered, replacing previous factory");
        }
    }

    async fn ensure_builtins_registered(&self) {
        let deps = self.browser_ws_deps.clone();
        self.builtins_registered
            .get_or_init(move || async move {
                self.register(
                    ConnectorKind::Http.to_string(),
                    Arc::new(|target: Target| -> KrawallResult<Box<dyn Connector>> {
                        Ok(Box::new(HttpConnector::new(target)?))
                    }),
                )
                .await;
                self.register(
                    ConnectorKind::Ws.to_string(),
                    Arc::new(|target: Target| -> KrawallResult<Box<dyn Connector>> {
                        Ok(Box::new(WsConnector::new(target)))
                    }),
                )
                .await;
                self.register(
                    ConnectorKind::Sse.to_string(),
                    Arc::new(|target: Target| -> KrawallResult<Box<dyn Connector>> {
                        Ok(Box::new(SseConnector::new(target)?))
                    }),
                )
                .await;
                self.register(
                    ConnectorKind::Grpc.to_string(),
                    Arc::new(|target: Target| -> KrawallResult<Box<dyn Connector>> {
                        Ok(Box::new(GrpcConnector::new(target)?))
                    }),
                )
                .await;
                self.register(
                    ConnectorKind::BrowserWs.to_string(),
                    Arc::new(move |target: Target| -> KrawallResult<Box<dyn Connector>> {
                        let deps = deps.clone();
                        Ok(Box::new(BrowserWsConnector::new(
                            target,
                            deps.cache,
                            deps.discoverer,
                            deps.pubsub,
                            deps.discovery_ttl,
                            deps.session_max_age,
                        )))
                    }),
                )
                .await;
            })
            .await;
    }

    /// Instantiates a connector for `target.kind`, ensuring the built-in
    /// set is registered first. Unknown kinds raise
    /// [`KrawallError::config`] naming the available set (spec.md §4.13).
    pub async fn create(&self, target: Target) -> KrawallResult<Box<dyn Connector>> {
        self.ensure_builtins_registered().await;
        let kind = target.kind.to_string();
        let factory = {
            let factories = self.factories.read().await;
            factories.get(&kind).cloned()
        };
        match factory {
            Some(factory) => factory(target),
            None => {
                let factories = self.factories.read().await;
                let mut available: Vec<&str> = factories.keys().map(String::as_str).collect();
                available.sort_unstable();
                Err(KrawallError::config(format!(
                    "unknown connector kind '{kind}', available: [{}]",
                    available.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InMemoryPubSub;
    use crate::scheduler::BrowserDiscoverer;
    use crate::store::InMemoryStore;
    use krawall_core::{AuthConfig, AuthKind, RequestTemplate, ResponseTemplate, ResponseTransform, TargetId};
    use std::collections::HashMap;

    fn deps() -> BrowserWsDeps {
        let store: Arc<dyn crate::store::KeyValueStore> = Arc::new(InMemoryStore::new());
        BrowserWsDeps {
            cache: Arc::new(DiscoveryCache::new(store)),
            discoverer: Arc::new(BrowserDiscoverer),
            pubsub: Some(Arc::new(InMemoryPubSub::new())),
            discovery_ttl: Duration::from_secs(300),
            session_max_age: Duration::from_secs(300),
        }
    }

    fn http_target() -> Target {
        Target {
            id: TargetId::from("t1"),
            name: "http target".into(),
            kind: ConnectorKind::Http,
            endpoint_url: "https://example.com".into(),
            auth_kind: AuthKind::None,
            auth_config: AuthConfig::default(),
            request_template: RequestTemplate {
                message_path: "message".into(),
                structure: serde_json::json!({}),
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

    #[tokio::test]
    async fn creates_a_builtin_http_connector() {
        let registry = ConnectorRegistry::new(deps());
        let connector = registry.create(http_target()).await.unwrap();
        assert!(!connector.is_connected().await);
    }

    #[tokio::test]
    async fn unknown_kind_names_the_available_set() {
        // `ConnectorKind` is a closed enum, so the only way to exercise
        // the unknown-kind path is to ask a registry that was never
        // allowed to register its built-ins.
        let registry = ConnectorRegistry::new(deps());
        registry.builtins_registered.set(()).unwrap();
        let err = registry.create(http_target()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown connector kind"));
        assert!(message.contains("available: []"));
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites_without_erroring() {
        let registry = ConnectorRegistry::new(deps());
        registry.ensure_builtins_registered().await;
        registry
            .register(
                ConnectorKind::Http.to_string(),
                Arc::new(|target: Target| -> KrawallResult<Box<dyn Connector>> {
                    Ok(Box::new(HttpConnector::new(target)?))
                }),
            )
            .await;
        // No panic/error: last write wins.
        let connector = registry.create(http_target()).await.unwrap();
        assert!(!connector.is_connected().await);
    }
}
