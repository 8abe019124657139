//! # krawall
//!
//! Connector runtime for an automated chatbot-widget testing platform.
//! A `Target` describes one chat widget under test (its endpoint, auth,
//! and request/response templates); a [`krawall_core::Connector`] drives
//! it over HTTP, raw WebSocket, SSE, gRPC, or a browser-discovered
//! WebSocket/Socket.IO session, behind one `connect`/`send`/`disconnect`
//! trait.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use krawall::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> krawall_core::KrawallResult<()> {
//!     let store: std::sync::Arc<dyn KeyValueStore> = std::sync::Arc::new(InMemoryStore::new());
//!     let cache = std::sync::Arc::new(DiscoveryCache::new(store));
//!     let registry = ConnectorRegistry::new(BrowserWsDeps {
//!         cache,
//!         discoverer: std::sync::Arc::new(krawall_runtime::BrowserDiscoverer),
//!         pubsub: None,
//!         discovery_ttl: std::time::Duration::from_secs(300),
//!         session_max_age: std::time::Duration::from_secs(300),
//!     });
//!     let mut connector = registry.create(target).await?;
//!     connector.connect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `http`, `ws`, `sse`, `grpc`: enable the matching built-in connector
//!   kind (all on by default).
//! - `browser-ws`: enable browser-mediated WebSocket discovery and the
//!   Socket.IO/Engine.IO handler it may dispatch to.
//! - `toml-config`: enable TOML file loading for [`krawall_runtime::RuntimeConfig`].
//! - `json-log`: enable JSON-formatted log output.

pub use krawall_core::*;
pub use krawall_runtime;

#[cfg(feature = "ws")]
pub use krawall_transport;

#[cfg(feature = "browser-ws")]
pub use krawall_browser;

#[cfg(feature = "browser-ws")]
pub use krawall_socketio;

/// Convenience re-exports for the types most callers need to compose a
/// runtime: the registry, its collaborators, and the connector trait.
pub mod prelude {
    pub use krawall_core::{Connector, HealthCheck, KrawallError, KrawallResult, SendMeta, SendOutcome, Target};
    pub use krawall_runtime::{
        BrowserWsDeps, ConnectorRegistry, DiscoveryCache, InMemoryPubSub, InMemoryStore, KeyValueStore, PubSub,
        RuntimeConfig, TokenRefreshScheduler,
    };

    #[cfg(feature = "ws")]
    pub use krawall_transport::WsConnector;
    #[cfg(feature = "http")]
    pub use krawall_transport::HttpConnector;
    #[cfg(feature = "sse")]
    pub use krawall_transport::SseConnector;
    #[cfg(feature = "grpc")]
    pub use krawall_transport::GrpcConnector;

    #[cfg(feature = "browser-ws")]
    pub use krawall_runtime::BrowserWsConnector;
}
