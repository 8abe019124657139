//! Token refresh scheduler (spec.md §4.14, component C14): a periodic
//! rediscovery job per target plus a `token-refreshed` notification and
//! operational status tracking. The job queue itself is modeled behind
//! [`JobScheduler`] with a `tokio::time::interval`-driven in-process
//! implementation (spec.md §1 treats the job-queue infrastructure beyond
//! this contract as out of scope); a real deployment wires `schedule`/
//! `cancel`/`forceRefresh` to its own queue.

use crate::cache::DiscoveryCache;
use crate::pubsub::{PubSub, RefreshTrigger, TokenRefreshed};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use dashmap::DashMap;
use krawall_core::{KrawallResult, RefreshOutcome, RefreshStatus, TargetId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn status_key(target_id: &str) -> String {
    format!("refresh-status:{target_id}")
}

/// Default fraction of the session's max-age a target is re-discovered
/// at (spec.md §4.14): `refreshIntervalMs = session.maxAge × 0.75`.
pub const DEFAULT_REFRESH_AHEAD_PERCENT: f64 = 0.75;

/// Re-runs browser-mediated discovery for a single page. Exists so the
/// scheduler can be exercised in tests without driving an actual
/// browser; [`BrowserDiscoverer`] is the real implementation used in
/// production, backed by `krawall_browser::discover`.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, page_url: &str) -> KrawallResult<krawall_core::DiscoveryResult>;
}

/// Production [`Discoverer`] driving an actual headless browser.
#[derive(Default)]
pub struct BrowserDiscoverer;

#[async_trait]
impl Discoverer for BrowserDiscoverer {
    async fn discover(&self, page_url: &str) -> KrawallResult<krawall_core::DiscoveryResult> {
        krawall_browser::discover(page_url).await
    }
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedules a repeatable refresh job for `target_id`, rediscovering
    /// `page_url` every `session_max_age * refreshAheadPercent`.
    async fn schedule(&self, target_id: TargetId, page_url: String, session_max_age: Duration);

    /// Cancels the repeatable job for `target_id` and clears its status.
    async fn cancel(&self, target_id: &TargetId);

    /// Runs one refresh cycle immediately, outside the repeatable schedule.
    async fn force_refresh(&self, target_id: &TargetId, page_url: String);

    /// Whether a repeatable job is currently registered for `target_id`.
    async fn is_scheduled(&self, target_id: &TargetId) -> bool;
}

struct Job {
    handle: JoinHandle<()>,
}

impl Drop for Job {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// In-process [`JobScheduler`] implementation (spec.md §4.14).
pub struct TokenRefreshScheduler {
    status_store: Arc<dyn KeyValueStore>,
    cache: Arc<DiscoveryCache>,
    pubsub: Arc<dyn PubSub>,
    discoverer: Arc<dyn Discoverer>,
    discovery_ttl: Duration,
    refresh_ahead_percent: f64,
    jobs: DashMap<TargetId, Job>,
}

impl TokenRefreshScheduler {
    pub fn new(
        status_store: Arc<dyn KeyValueStore>,
        cache: Arc<DiscoveryCache>,
        pubsub: Arc<dyn PubSub>,
        discovery_ttl: Duration,
    ) -> Self {
        Self::with_discoverer(status_store, cache, pubsub, Arc::new(BrowserDiscoverer), discovery_ttl)
    }

    pub fn with_discoverer(
        status_store: Arc<dyn KeyValueStore>,
        cache: Arc<DiscoveryCache>,
        pubsub: Arc<dyn PubSub>,
        discoverer: Arc<dyn Discoverer>,
        discovery_ttl: Duration,
    ) -> Self {
        Self {
            status_store,
            cache,
            pubsub,
            discoverer,
            discovery_ttl,
            refresh_ahead_percent: DEFAULT_REFRESH_AHEAD_PERCENT,
            jobs: DashMap::new(),
        }
    }

    /// Returns the current refresh status for `target_id`, if any.
    pub async fn status(&self, target_id: &TargetId) -> Option<RefreshStatus> {
        let raw = self.status_store.get(&status_key(&target_id.0)).await?;
        serde_json::from_str(&raw).ok()
    }

    async fn write_status(&self, target_id: &TargetId, status: &RefreshStatus) {
        if let Ok(raw) = serde_json::to_string(status) {
            self.status_store
                .set(&status_key(&target_id.0), raw, Duration::from_secs(3600))
                .await;
        }
    }
}

#[async_trait]
impl JobScheduler for TokenRefreshScheduler {
    async fn schedule(&self, target_id: TargetId, page_url: String, session_max_age: Duration) {
        let interval = session_max_age.mul_f64(self.refresh_ahead_percent);
        let next_refresh_at = chrono::Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
        self.write_status(&target_id, &RefreshStatus::scheduled(interval.as_millis() as u64, next_refresh_at))
            .await;

        let cache = self.cache.clone();
        let pubsub = self.pubsub.clone();
        let discoverer = self.discoverer.clone();
        let status_store = self.status_store.clone();
        let tid = target_id.clone();
        let ttl = self.discovery_ttl;
        let refresh_ahead_percent = self.refresh_ahead_percent;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                run_refresh_cycle(
                    &tid,
                    &page_url,
                    discoverer.as_ref(),
                    &cache,
                    &pubsub,
                    &status_store,
                    ttl,
                    RefreshTrigger::Scheduled,
                    interval.as_millis() as u64,
                    refresh_ahead_percent,
                )
                .await;
            }
        });

        self.jobs.insert(target_id, Job { handle });
    }

    async fn cancel(&self, target_id: &TargetId) {
        self.jobs.remove(target_id);
        self.write_status(target_id, &RefreshStatus::cancelled()).await;
    }

    async fn force_refresh(&self, target_id: &TargetId, page_url: String) {
        let interval_ms = self
            .status(target_id)
            .await
            .map(|s| s.refresh_interval_ms)
            .unwrap_or(0);
        run_refresh_cycle(
            target_id,
            &page_url,
            self.discoverer.as_ref(),
            &self.cache,
            &self.pubsub,
            &self.status_store,
            self.discovery_ttl,
            RefreshTrigger::Manual,
            interval_ms,
            self.refresh_ahead_percent,
        )
        .await;
    }

    async fn is_scheduled(&self, target_id: &TargetId) -> bool {
        self.jobs.contains_key(target_id)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_refresh_cycle(
    target_id: &TargetId,
    page_url: &str,
    discoverer: &dyn Discoverer,
    cache: &DiscoveryCache,
    pubsub: &dyn PubSub,
    status_store: &Arc<dyn KeyValueStore>,
    ttl: Duration,
    triggered_by: RefreshTrigger,
    interval_ms: u64,
    refresh_ahead_percent: f64,
) {
    let _ = refresh_ahead_percent; // retained for future interval recomputation from a fresh session max-age
    match discoverer.discover(page_url).await {
        Ok(result) => {
            cache.put(&target_id.0, &result, ttl).await;
            let status = RefreshStatus {
                last_refresh_at: Some(chrono::Utc::now()),
                last_refresh_status: Some(RefreshOutcome::Success),
                consecutive_failures: 0,
                is_active: true,
                refresh_interval_ms: interval_ms,
                next_refresh_at: Some(chrono::Utc::now() + chrono::Duration::milliseconds(interval_ms as i64)),
            };
            if let Ok(raw) = serde_json::to_string(&status) {
                status_store.set(&status_key(&target_id.0), raw, Duration::from_secs(3600)).await;
            }
            pubsub
                .publish(TokenRefreshed {
                    target_id: target_id.0.clone(),
                    triggered_by,
                    timestamp: chrono::Utc::now(),
                })
                .await;
            info!(target_id = %target_id, "token refresh succeeded");
        }
        Err(e) => {
            let previous = status_store
                .get(&status_key(&target_id.0))
                .await
                .and_then(|raw| serde_json::from_str::<RefreshStatus>(&raw).ok());
            let consecutive_failures = previous.map(|s| s.consecutive_failures + 1).unwrap_or(1);
            let status = RefreshStatus {
                last_refresh_at: Some(chrono::Utc::now()),
                last_refresh_status: Some(RefreshOutcome::Failure),
                consecutive_failures,
                is_active: true,
                refresh_interval_ms: interval_ms,
                next_refresh_at: Some(chrono::Utc::now() + chrono::Duration::milliseconds(interval_ms as i64)),
            };
            if let Ok(raw) = serde_json::to_string(&status) {
                status_store.set(&status_key(&target_id.0), raw, Duration::from_secs(3600)).await;
            }
            warn!(target_id = %target_id, error = %e, consecutive_failures, "token refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use krawall_core::DetectedProtocol;
    use std::collections::HashMap;

    /// Fails every discovery attempt, to exercise the failure-path
    /// bookkeeping without driving an actual browser.
    struct FailingDiscoverer;

    #[async_trait]
    impl Discoverer for FailingDiscoverer {
        async fn discover(&self, _page_url: &str) -> KrawallResult<krawall_core::DiscoveryResult> {
            Err(krawall_core::KrawallError::DiscoveryFailed {
                stage: "widget".into(),
                context: "no WebSocket observed".into(),
            })
        }
    }

    /// Succeeds with a fixed discovery result, to exercise the
    /// success-path bookkeeping.
    struct SucceedingDiscoverer;

    #[async_trait]
    impl Discoverer for SucceedingDiscoverer {
        async fn discover(&self, _page_url: &str) -> KrawallResult<krawall_core::DiscoveryResult> {
            Ok(krawall_core::DiscoveryResult {
                wss_url: "wss://example.com/ws".into(),
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

    fn scheduler() -> TokenRefreshScheduler {
        scheduler_with(Arc::new(FailingDiscoverer))
    }

    fn scheduler_with(discoverer: Arc<dyn Discoverer>) -> TokenRefreshScheduler {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let cache = Arc::new(DiscoveryCache::new(store.clone()));
        let pubsub: Arc<dyn PubSub> = Arc::new(crate::pubsub::InMemoryPubSub::new());
        TokenRefreshScheduler::with_discoverer(store, cache, pubsub, discoverer, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn schedule_marks_the_target_active() {
        let scheduler = scheduler();
        let target_id = TargetId::from("t1");
        scheduler
            .schedule(target_id.clone(), "https://example.com".into(), Duration::from_secs(400))
            .await;
        assert!(scheduler.is_scheduled(&target_id).await);
        let status = scheduler.status(&target_id).await.unwrap();
        assert!(status.is_active);
        assert_eq!(status.refresh_interval_ms, 300_000);
    }

    #[tokio::test]
    async fn cancel_clears_the_schedule_and_marks_inactive() {
        let scheduler = scheduler();
        let target_id = TargetId::from("t1");
        scheduler
            .schedule(target_id.clone(), "https://example.com".into(), Duration::from_secs(400))
            .await;
        scheduler.cancel(&target_id).await;
        assert!(!scheduler.is_scheduled(&target_id).await);
        let status = scheduler.status(&target_id).await.unwrap();
        assert!(!status.is_active);
    }

    #[tokio::test]
    async fn force_refresh_against_an_unreachable_page_records_failure() {
        let scheduler = scheduler();
        let target_id = TargetId::from("t1");
        scheduler.force_refresh(&target_id, "about:blank".into()).await;
        let status = scheduler.status(&target_id).await.unwrap();
        assert_eq!(status.last_refresh_status, Some(RefreshOutcome::Failure));
        assert_eq!(status.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn force_refresh_success_publishes_a_refresh_event_and_populates_the_cache() {
        let scheduler = scheduler_with(Arc::new(SucceedingDiscoverer));
        let mut events = scheduler.pubsub.subscribe();
        let target_id = TargetId::from("t1");
        scheduler.force_refresh(&target_id, "https://example.com".into()).await;

        let status = scheduler.status(&target_id).await.unwrap();
        assert_eq!(status.last_refresh_status, Some(RefreshOutcome::Success));
        assert_eq!(status.consecutive_failures, 0);

        let cached = scheduler.cache.get("t1").await.unwrap();
        assert_eq!(cached.wss_url, "wss://example.com/ws");

        let event = events.recv().await.unwrap();
        assert_eq!(event.target_id, "t1");
        assert_eq!(event.triggered_by, RefreshTrigger::Manual);
    }
}
