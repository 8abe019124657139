//! The connector contract every protocol implementation exposes
//! (spec.md §4.4).

use crate::error::KrawallResult;
use crate::model::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Caller-supplied metadata accompanying a `send` call — currently just a
/// per-call variable overlay merged on top of the target's template
/// variables, echoed back unchanged in [`SendOutcome::meta`].
#[derive(Debug, Clone, Default)]
pub struct SendMeta {
    pub variables: HashMap<String, Value>,
}

/// Result of a successful `send`: the extracted content plus whatever
/// metadata the connector attaches (token usage, raw response, latency).
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub content: String,
    pub tokens: Option<TokenUsage>,
    pub error: Option<String>,
    pub meta: SendMeta,
    pub latency_ms: u64,
}

/// Result of a `healthCheck` call.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl HealthCheck {
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
        }
    }

    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// The common operation set every protocol implementation exposes
/// (spec.md §4.4). `connect` is idempotent: concurrent callers share the
/// same in-flight attempt — implementations achieve this with a
/// `tokio::sync::OnceCell`/mutex-guarded state machine, not by re-dialing
/// per caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes the connection. Idempotent under concurrent callers.
    async fn connect(&self) -> KrawallResult<()>;

    /// Tears the connection down. Safe to call when not connected.
    async fn disconnect(&self) -> KrawallResult<()>;

    /// Whether the connector currently believes it is connected.
    async fn is_connected(&self) -> bool;

    /// Sends `msg` through the target's request template and extracts the
    /// response via its response template. Fails with
    /// [`crate::error::KrawallError::NotConnected`] if `connect` has not
    /// succeeded yet.
    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome>;

    /// Whether this connector can stream partial responses (SSE/WS-style).
    /// HTTP and gRPC unary connectors return `false`.
    fn supports_streaming(&self) -> bool;

    /// Lightweight liveness probe, fails with
    /// [`crate::error::KrawallError::NotConnected`] if not connected.
    async fn health_check(&self) -> KrawallResult<HealthCheck>;
}
