//! Key-value store contract (spec.md §1/§7): the discovery cache (C15)
//! and the refresh status record (part of C14) are both read/write
//! against a small external collaborator rather than an in-process map,
//! so a real deployment can back this with Redis or similar without this
//! crate knowing its storage format. [`InMemoryStore`] is the
//! `DashMap`-backed implementation used by tests and the demo CLI.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Minimal TTL-aware key-value contract every cache/status store in this
/// crate is built against.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the raw value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Writes `value` at `key` with the given TTL. Implementations should
    /// treat a write failure as non-fatal to the caller (spec.md §4.15:
    /// "cache write failure is non-fatal, logged, not raised") — this
    /// trait therefore has no `Result` in its signature; an
    /// implementation backed by a fallible remote store logs internally
    /// and simply skips the write rather than propagating an error here.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Removes `key`, if present.
    async fn delete(&self, key: &str);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory, TTL-aware [`KeyValueStore`] backed by [`DashMap`]. Expiry is
/// checked lazily on read rather than by a background sweep, matching the
/// scope of a demo/test collaborator rather than a production cache.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let store = InMemoryStore::new();
        store.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = InMemoryStore::new();
        store.set("k", "v".into(), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let store = InMemoryStore::new();
        store.set("k", "v".into(), Duration::from_secs(60)).await;
        store.delete("k").await;
        assert_eq!(store.get("k").await, None);
    }
}
