//! Composition, registry, scheduling and configuration layer for the
//! krawall connector runtime.
//!
//! This crate wires together `krawall-core`'s [`krawall_core::Connector`]
//! trait with concrete transports (`krawall-transport`), browser-mediated
//! discovery (`krawall-browser`, `krawall-socketio`) into the pieces a
//! host process actually composes at startup:
//!
//! - [`store`] / [`pubsub`] — thin traits over a shared key-value store and
//!   pub/sub channel, so a real deployment can swap in Redis or similar
//!   without this crate knowing about it.
//! - [`cache`] — a typed discovery-result cache on top of [`store`].
//! - [`scheduler`] — the proactive token-refresh background job (C14).
//! - [`browser_ws`] — the browser-discovered WebSocket connector (C12),
//!   dispatching to a raw or Socket.IO connector depending on what
//!   discovery observed.
//! - [`registry`] — the connector registry (C13) that turns a `Target`
//!   into a boxed `Connector`.
//! - [`config`] — `RuntimeConfig` loading/validation.
//! - [`logging`] — `tracing`-based logging setup.

pub mod browser_ws;
pub mod cache;
pub mod config;
pub mod logging;
pub mod pubsub;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use browser_ws::BrowserWsConnector;
pub use cache::DiscoveryCache;
pub use config::{ConfigError, ConfigLoader, ConfigResult, RuntimeConfig};
pub use logging::{LoggingBuilder, SpanEvents};
pub use pubsub::{InMemoryPubSub, PubSub, RefreshTrigger, TokenRefreshed};
pub use registry::{BrowserWsDeps, ConnectorRegistry};
pub use scheduler::{BrowserDiscoverer, Discoverer, JobScheduler, TokenRefreshScheduler};
pub use store::{InMemoryStore, KeyValueStore};

// Re-exported so downstream crates can log without a direct `tracing`
// dependency of their own, matching the teacher's re-export.
pub use tracing;
pub use tracing_subscriber;

/// Convenience re-exports for the macros and types most callers reach for.
pub mod prelude {
    pub use crate::{
        BrowserWsConnector, BrowserWsDeps, ConnectorRegistry, DiscoveryCache, InMemoryPubSub, InMemoryStore,
        PubSub, RuntimeConfig, TokenRefreshScheduler,
    };
    pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};
}
