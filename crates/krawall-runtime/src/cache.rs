//! Discovery cache (spec.md §4.15, component C15): a thin, typed layer
//! over [`KeyValueStore`] keyed `discovery:<targetId>`. `DiscoveryResult`
//! is already `Serialize`/`Deserialize` with `discoveredAt` as an
//! ISO-8601 timestamp via `chrono`'s serde support, so this module is
//! just the key-naming and TTL-rounding convention on top.

use crate::store::KeyValueStore;
use krawall_core::DiscoveryResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

fn cache_key(target_id: &str) -> String {
    format!("discovery:{target_id}")
}

/// Typed discovery-result cache (spec.md §4.15).
pub struct DiscoveryCache {
    store: Arc<dyn KeyValueStore>,
}

impl DiscoveryCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads the cached result for `target_id`, if present and unexpired.
    pub async fn get(&self, target_id: &str) -> Option<DiscoveryResult> {
        let raw = self.store.get(&cache_key(target_id)).await?;
        match serde_json::from_str(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(target_id, error = %e, "discarding unparseable cached discovery result");
                None
            }
        }
    }

    /// Writes `result` for `target_id` with `ttl` (rounded up to whole
    /// seconds, per spec.md §4.15). A serialization failure is logged,
    /// not raised, matching the non-fatal write contract.
    pub async fn put(&self, target_id: &str, result: &DiscoveryResult, ttl: Duration) {
        let ttl = Duration::from_secs(ttl.as_secs_f64().ceil() as u64);
        match serde_json::to_string(result) {
            Ok(raw) => self.store.set(&cache_key(target_id), raw, ttl).await,
            Err(e) => warn!(target_id, error = %e, "failed to serialize discovery result for cache write"),
        }
    }

    /// Evicts the cached result for `target_id`, forcing the next
    /// `connect`/`healthCheck` to re-run discovery.
    pub async fn invalidate(&self, target_id: &str) {
        self.store.delete(&cache_key(target_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use krawall_core::DetectedProtocol;
    use std::collections::HashMap;

    fn sample() -> DiscoveryResult {
        DiscoveryResult {
            wss_url: "wss://example.com/ws".into(),
            cookies: Vec::new(),
            headers: HashMap::new(),
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            captured_frames: Vec::new(),
            detected_protocol: DetectedProtocol::Raw,
            socket_io_config: None,
            discovered_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_the_store() {
        let cache = DiscoveryCache::new(Arc::new(InMemoryStore::new()));
        cache.put("t1", &sample(), Duration::from_secs(300)).await;
        let restored = cache.get("t1").await.unwrap();
        assert_eq!(restored.wss_url, "wss://example.com/ws");
    }

    #[tokio::test]
    async fn invalidate_clears_the_entry() {
        let cache = DiscoveryCache::new(Arc::new(InMemoryStore::new()));
        cache.put("t1", &sample(), Duration::from_secs(300)).await;
        cache.invalidate("t1").await;
        assert!(cache.get("t1").await.is_none());
    }

    #[tokio::test]
    async fn miss_for_unknown_target_returns_none() {
        let cache = DiscoveryCache::new(Arc::new(InMemoryStore::new()));
        assert!(cache.get("missing").await.is_none());
    }
}
