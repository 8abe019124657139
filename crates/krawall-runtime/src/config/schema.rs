//! Configuration schema for the connector runtime, loaded via `figment`
//! (TOML file + environment overrides, spec.md's "Environment inputs").
//!
//! ```text
//! RuntimeConfig
//! ├── namespace_prefix: String        # shared-store key namespace
//! ├── browser: BrowserConfig          # discovery browser launch settings
//! ├── proxy: ProxyConfig              # proxy for browser + outbound HTTP
//! ├── timeouts: TimeoutsConfig        # connector-level default timeouts
//! ├── refresh_ahead_percent: f64      # default for C14's schedule()
//! ├── discovery_ttl_secs: u64         # default discovery cache TTL
//! └── logging: LoggingConfig
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a krawall-runtime host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Prefix applied to every key this process writes to the shared
    /// [`crate::store::KeyValueStore`], so several runtimes can share one
    /// backing store without key collisions (spec.md "Environment inputs").
    pub namespace_prefix: String,

    /// Discovery browser launch settings.
    pub browser: BrowserConfig,

    /// Proxy configuration for browser launch and outbound HTTP/WS.
    pub proxy: ProxyConfig,

    /// Default per-connector timeouts.
    pub timeouts: TimeoutsConfig,

    /// Default fraction of a session's max age at which C14 schedules its
    /// repeating refresh job (spec.md §4.14, default `0.75`).
    #[serde(default = "default_refresh_ahead_percent")]
    pub refresh_ahead_percent: f64,

    /// Default discovery cache TTL in seconds, used when a caller doesn't
    /// supply one explicitly (spec.md §4.15).
    #[serde(default = "default_discovery_ttl_secs")]
    pub discovery_ttl_secs: u64,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: default_namespace_prefix(),
            browser: BrowserConfig::default(),
            proxy: ProxyConfig::default(),
            timeouts: TimeoutsConfig::default(),
            refresh_ahead_percent: default_refresh_ahead_percent(),
            discovery_ttl_secs: default_discovery_ttl_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Returns the discovery TTL as a [`Duration`].
    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }

    /// Prefixes `key` with the configured namespace, e.g.
    /// `discovery:t1` -> `myapp:discovery:t1`.
    pub fn namespaced_key(&self, key: &str) -> String {
        if self.namespace_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace_prefix)
        }
    }
}

fn default_namespace_prefix() -> String {
    "krawall".to_string()
}

fn default_refresh_ahead_percent() -> f64 {
    0.75
}

fn default_discovery_ttl_secs() -> u64 {
    300
}

// =============================================================================
// Browser configuration
// =============================================================================

/// Discovery-browser launch settings (spec.md C9/C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path to a browser executable. `None` lets the launcher fall back to
    /// a bundled binary, per spec.md's "Environment inputs".
    pub executable_path: Option<PathBuf>,

    /// Whether to launch headless (default) or headed, useful when
    /// debugging a widget that misbehaves under headless Chromium.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Maximum time to wait for the WebSocket upgrade to be observed.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            discovery_timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl BrowserConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

fn default_discovery_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Proxy configuration
// =============================================================================

/// Optional proxy used both for launching the discovery browser and for
/// outbound HTTP/WS connectors (spec.md "Environment inputs").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

// =============================================================================
// Timeouts
// =============================================================================

/// Default timeouts applied to connectors that don't override them via
/// their own target configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout_secs(),
            request_secs: default_request_timeout_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Logging configuration
// =============================================================================

/// Logging configuration, mirrored onto [`crate::logging::LoggingBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, json: false }
    }
}

/// Log level, mapped onto [`tracing::Level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
