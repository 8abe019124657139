//! # krawall-core
//!
//! Protocol-agnostic building blocks shared by every connector
//! implementation in the krawall connector runtime:
//!
//! - [`path`] — dot/bracket JSON path parsing, evaluation and assignment.
//! - [`template`] — template-driven request/response marshalling.
//! - [`auth`] — typed auth config → request headers/query params.
//! - [`connector`] — the common `Connector` trait every protocol implements.
//! - [`model`] — the shared data model (targets, templates, discovery
//!   results, refresh status).
//! - [`error`] — the unified error taxonomy.
//! - [`redact`] — helpers to keep secrets out of logs.
//!
//! This crate performs no I/O; everything here is pure data transformation
//! so it can be unit tested without a network, a browser, or a clock.

pub mod auth;
pub mod connector;
pub mod error;
pub mod model;
pub mod path;
pub mod redact;
pub mod template;

pub use auth::{AuthHeaders, build_auth_headers, build_auth_query_params};
pub use connector::{Connector, HealthCheck, SendMeta, SendOutcome};
pub use error::{KrawallError, KrawallResult};
pub use model::{
    AuthConfig, AuthKind, CapturedFrame, CapturedWebSocket, ConnectorKind, Cookie,
    DetectedProtocol, DiscoveryResult, FrameDirection, RefreshOutcome, RefreshStatus,
    RequestTemplate, ResponseTemplate, ResponseTransform, SocketIoConfig, Target, TargetId,
    TokenUsage,
};
pub use path::{Path, PathSegment};
pub use redact::Redacted;
pub use template::{build_request, extract_error, extract_response, extract_tokens};

/// Prelude for common imports across downstream crates.
pub mod prelude {
    pub use super::auth::*;
    pub use super::connector::*;
    pub use super::error::*;
    pub use super::model::*;
    pub use super::path::*;
    pub use super::template::*;
}
