//! In-process wiring for the `krawall-send` demo: an in-memory
//! [`krawall_runtime::KeyValueStore`] and
//! [`krawall_runtime::PubSub`] backing a [`krawall_runtime::ConnectorRegistry`],
//! standing in for the Redis-backed store and external pub/sub channel a
//! real deployment would supply (spec.md §1 treats persistence and the
//! job-queue infrastructure as external collaborators reached only
//! through their trait contracts).

use krawall_runtime::{BrowserDiscoverer, BrowserWsDeps, ConnectorRegistry, DiscoveryCache, InMemoryPubSub, InMemoryStore};
use std::sync::Arc;
use std::time::Duration;

/// Builds a [`ConnectorRegistry`] backed entirely by in-memory
/// collaborators, suitable for a one-shot CLI invocation or a test.
pub fn in_memory_registry(discovery_ttl: Duration, session_max_age: Duration) -> ConnectorRegistry {
    let store: Arc<dyn krawall_runtime::KeyValueStore> = Arc::new(InMemoryStore::new());
    let cache = Arc::new(DiscoveryCache::new(store));
    let deps = BrowserWsDeps {
        cache,
        discoverer: Arc::new(BrowserDiscoverer),
        pubsub: Some(Arc::new(InMemoryPubSub::new())),
        discovery_ttl,
        session_max_age,
    };
    ConnectorRegistry::new(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_a_usable_registry() {
        let registry = in_memory_registry(Duration::from_secs(300), Duration::from_secs(300));
        let target = krawall_core::Target {
            id: krawall_core::TargetId::from("demo"),
            name: "demo target".into(),
            kind: krawall_core::ConnectorKind::Http,
            endpoint_url: "https://example.com".into(),
            auth_kind: krawall_core::AuthKind::None,
            auth_config: krawall_core::AuthConfig::default(),
            request_template: krawall_core::RequestTemplate {
                message_path: "message".into(),
                structure: serde_json::json!({}),
                variables: std::collections::HashMap::new(),
            },
            response_template: krawall_core::ResponseTemplate {
                response_path: "reply".into(),
                token_usage_path: None,
                error_path: None,
                transform: krawall_core::ResponseTransform::None,
            },
            protocol_config: serde_json::Value::Null,
            active: true,
            last_test_at: None,
            last_test_outcome: None,
        };
        let connector = registry.create(target).await.unwrap();
        assert!(!connector.is_connected().await);
    }
}
