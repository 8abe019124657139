//! The data model shared across the runtime: targets, templates, discovery
//! results and the records the refresh scheduler tracks.
//!
//! Every type here is `Serialize`/`Deserialize` so the external persistence
//! and cache collaborators (out of scope per spec.md §1) can move these
//! values in and out of their own storage without this crate knowing the
//! storage format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Newtype over the caller-supplied target identifier used throughout cache
/// keys and channel payloads (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        TargetId(value.to_string())
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        TargetId(value)
    }
}

/// Connector kind a [`Target`] is described with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Http,
    Ws,
    Sse,
    Grpc,
    BrowserWs,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorKind::Http => "http",
            ConnectorKind::Ws => "ws",
            ConnectorKind::Sse => "sse",
            ConnectorKind::Grpc => "grpc",
            ConnectorKind::BrowserWs => "browser-ws",
        };
        write!(f, "{s}")
    }
}

/// Auth kind a [`Target`] is described with (spec.md §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Bearer,
    ApiKey,
    BasicAuth,
    CustomHeader,
    OAuth2,
}

/// Opaque, kind-specific auth configuration. Values here are assumed
/// pre-decrypted by the persistence collaborator (spec.md §6); this crate
/// never decrypts anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

impl AuthConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// `messagePath` + `structure` prototype + `${name}` variable substitutions
/// (spec.md §3 Request template).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub message_path: String,
    pub structure: serde_json::Value,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

/// How the extracted response content is post-processed (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseTransform {
    #[default]
    None,
    MarkdownStrip,
    HtmlStrip,
}

/// `responsePath` + optional token/error paths + transform (spec.md §3
/// Response template).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub response_path: String,
    #[serde(default)]
    pub token_usage_path: Option<String>,
    #[serde(default)]
    pub error_path: Option<String>,
    #[serde(default)]
    pub transform: ResponseTransform,
}

/// Normalized token-usage object a caller reads back from a response
/// (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// The description of one chatbot endpoint under test (spec.md §3 Target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub kind: ConnectorKind,
    pub endpoint_url: String,
    pub auth_kind: AuthKind,
    #[serde(default)]
    pub auth_config: AuthConfig,
    pub request_template: RequestTemplate,
    pub response_template: ResponseTemplate,
    #[serde(default)]
    pub protocol_config: serde_json::Value,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub last_test_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_test_outcome: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Target {
    /// Validates the invariant from spec.md §3: a request template is
    /// required for all send-capable kinds, and BrowserWS requires a
    /// protocol config carrying a page URL.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_template.message_path.trim().is_empty() {
            return Err("request template messagePath must be non-empty".into());
        }
        if matches!(self.kind, ConnectorKind::BrowserWs) {
            let has_page_url = self
                .protocol_config
                .get("pageUrl")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if !has_page_url {
                return Err("BrowserWS targets require protocolConfig.pageUrl".into());
            }
        }
        Ok(())
    }
}

/// Direction of a captured WebSocket frame (spec.md §3 Captured frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDirection {
    Sent,
    Received,
}

/// `{direction, data, timestamp}` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub direction: FrameDirection,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

/// A single cookie captured from the browser context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// `{url, upgradeHeaders, frames, createdAt}` (spec.md §3 Captured WebSocket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedWebSocket {
    pub url: String,
    pub upgrade_headers: HashMap<String, String>,
    pub frames: Vec<CapturedFrame>,
    pub created_at: DateTime<Utc>,
}

/// Which wire protocol a captured WebSocket speaks (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectedProtocol {
    Raw,
    SocketIo,
}

/// `{sid, pingInterval, pingTimeout, engineIoVersion}` parsed from the
/// server's Engine.IO OPEN frame (spec.md §3 Socket.IO config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketIoConfig {
    pub sid: String,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub engine_io_version: u8,
}

impl SocketIoConfig {
    /// Defaults applied when no explicit handshake was observed
    /// (spec.md §4.10 step 3: frame-pattern classification).
    pub fn defaults(engine_io_version: u8) -> Self {
        Self {
            sid: String::new(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            engine_io_version,
        }
    }
}

/// The full result of one browser-mediated discovery run (spec.md §3
/// Discovery result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub wss_url: String,
    pub cookies: Vec<Cookie>,
    pub headers: HashMap<String, String>,
    pub local_storage: HashMap<String, String>,
    pub session_storage: HashMap<String, String>,
    pub captured_frames: Vec<CapturedFrame>,
    pub detected_protocol: DetectedProtocol,
    #[serde(default)]
    pub socket_io_config: Option<SocketIoConfig>,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveryResult {
    /// Synthesizes a `Cookie:` header value from the captured cookie jar,
    /// used by the browser-WS connector to build its internal WS auth
    /// config (spec.md §4.12 step 1).
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Outcome of the most recent scheduled refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshOutcome {
    Success,
    Failure,
}

/// Session-scoped refresh status, owned by the scheduler and exposed only
/// for operational visibility (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_refresh_status: Option<RefreshOutcome>,
    pub consecutive_failures: u32,
    pub is_active: bool,
    pub refresh_interval_ms: u64,
    pub next_refresh_at: Option<DateTime<Utc>>,
}

impl RefreshStatus {
    pub fn scheduled(refresh_interval_ms: u64, next_refresh_at: DateTime<Utc>) -> Self {
        Self {
            last_refresh_at: None,
            last_refresh_status: None,
            consecutive_failures: 0,
            is_active: true,
            refresh_interval_ms,
            next_refresh_at: Some(next_refresh_at),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            last_refresh_at: None,
            last_refresh_status: None,
            consecutive_failures: 0,
            is_active: false,
            refresh_interval_ms: 0,
            next_refresh_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_ws_target_requires_page_url() {
        let mut target = sample_target(ConnectorKind::BrowserWs);
        assert!(target.validate().is_err());
        target.protocol_config = serde_json::json!({"pageUrl": "https://example.com/chat"});
        assert!(target.validate().is_ok());
    }

    #[test]
    fn http_target_does_not_require_page_url() {
        let target = sample_target(ConnectorKind::Http);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn cookie_header_joins_with_semicolons() {
        let result = DiscoveryResult {
            wss_url: "wss://x".into(),
            cookies: vec![
                Cookie { name: "a".into(), value: "1".into(), domain: "x".into() },
                Cookie { name: "b".into(), value: "2".into(), domain: "x".into() },
            ],
            headers: HashMap::new(),
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            captured_frames: Vec::new(),
            detected_protocol: DetectedProtocol::Raw,
            socket_io_config: None,
            discovered_at: Utc::now(),
        };
        assert_eq!(result.cookie_header(), "a=1; b=2");
    }

    fn sample_target(kind: ConnectorKind) -> Target {
        Target {
            id: TargetId::from("t1"),
            name: "test".into(),
            kind,
            endpoint_url: "https://example.com".into(),
            auth_kind: AuthKind::None,
            auth_config: AuthConfig::default(),
            request_template: RequestTemplate {
                message_path: "messages.0.content".into(),
                structure: serde_json::json!({}),
                variables: HashMap::new(),
            },
            response_template: ResponseTemplate {
                response_path: "choices.0.message.content".into(),
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
}
