//! Pub/sub contract for the refresh-notification channel (spec.md §4.14,
//! §6: `krawall:token-refreshed`). Modeled behind a trait so a real
//! deployment can wire this to its own message bus; [`InMemoryPubSub`] is
//! a `tokio::sync::broadcast`-backed implementation for tests and the
//! demo CLI (spec.md §5: "the refresh pub/sub connection is shared,
//! duplicated per subscriber").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Payload published on a refresh event (spec.md §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshed {
    pub target_id: String,
    pub triggered_by: RefreshTrigger,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// What caused a given refresh cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Scheduled,
    Manual,
}

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes `event`. Implementations with no subscribers yet must
    /// not treat that as an error.
    async fn publish(&self, event: TokenRefreshed);

    /// Returns a fresh subscription receiving every event published from
    /// this point on.
    fn subscribe(&self) -> broadcast::Receiver<TokenRefreshed>;
}

/// In-process implementation backed by a single shared broadcast channel.
pub struct InMemoryPubSub {
    sender: broadcast::Sender<TokenRefreshed>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, event: TokenRefreshed) {
        // No subscribers is not an error: a target may not have an active
        // browser-WS connector listening at publish time.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenRefreshed> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let pubsub = InMemoryPubSub::new();
        let mut rx = pubsub.subscribe();
        pubsub
            .publish(TokenRefreshed {
                target_id: "t1".into(),
                triggered_by: RefreshTrigger::Manual,
                timestamp: chrono::Utc::now(),
            })
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.target_id, "t1");
        assert_eq!(event.triggered_by, RefreshTrigger::Manual);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let pubsub = InMemoryPubSub::new();
        pubsub
            .publish(TokenRefreshed {
                target_id: "t1".into(),
                triggered_by: RefreshTrigger::Scheduled,
                timestamp: chrono::Utc::now(),
            })
            .await;
    }
}
