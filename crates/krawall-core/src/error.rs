//! Unified error taxonomy for the connector runtime.
//!
//! Kinds, not types: every error surfaced to a caller is one of the variants
//! below. Transport-specific and browser-specific error detail is carried in
//! the variant payload rather than as a separate error type per crate, so a
//! caller can match on `KrawallError` alone regardless of which connector
//! produced it.

use thiserror::Error;

/// The unified error type surfaced by every krawall crate.
#[derive(Debug, Clone, Error)]
pub enum KrawallError {
    /// Malformed target, unknown auth kind, unknown connector kind, invalid
    /// path expression. Never retried.
    #[error("config error: {0}")]
    Config(String),

    /// `send`/`healthCheck` called before (or after losing) a successful
    /// `connect`.
    #[error("not connected")]
    NotConnected,

    /// 4xx/5xx from the remote endpoint.
    #[error("upstream HTTP error: status={status}{}", body.as_deref().map(|b| format!(", body={b}")).unwrap_or_default())]
    UpstreamHttp {
        /// HTTP status code.
        status: u16,
        /// Extracted error message from the response body, when available.
        body: Option<String>,
    },

    /// DNS, refused connection, TLS failure, abnormal WebSocket close, timeout.
    /// Retried for WebSocket auto-reconnect; surfaced as-is for HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// `responsePath` did not resolve against the response document.
    #[error("response shape error: path '{path}' did not resolve")]
    ResponseShape {
        /// The path expression that failed to resolve.
        path: String,
    },

    /// Browser-mediated discovery pipeline failure.
    #[error("discovery failed at stage '{stage}': {context}")]
    DiscoveryFailed {
        /// Which discovery stage failed (`widget`, `capture`, `classify`, ...).
        stage: String,
        /// Page title/URL, iframe count, selectors tried, etc.
        context: String,
    },

    /// Malformed Socket.IO/Engine.IO frame where one was required.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A scheduled refresh iteration failed. Recorded in status, not
    /// surfaced to active sessions.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
}

impl KrawallError {
    /// Shorthand for [`KrawallError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for [`KrawallError::Transport`].
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Shorthand for [`KrawallError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True for errors the runtime is allowed to retry locally
    /// (WebSocket auto-reconnect); false for everything surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KrawallError::Transport(_))
    }
}

impl From<std::io::Error> for KrawallError {
    fn from(err: std::io::Error) -> Self {
        KrawallError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for KrawallError {
    fn from(err: serde_json::Error) -> Self {
        KrawallError::Config(format!("JSON error: {err}"))
    }
}

/// Result type used throughout the workspace.
pub type KrawallResult<T> = Result<T, KrawallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable_others_are_not() {
        assert!(KrawallError::transport("closed").is_retryable());
        assert!(!KrawallError::NotConnected.is_retryable());
        assert!(!KrawallError::ResponseShape { path: "x".into() }.is_retryable());
    }

    #[test]
    fn upstream_http_message_includes_body_when_present() {
        let err = KrawallError::UpstreamHttp {
            status: 429,
            body: Some("rate limited".into()),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }
}
