//! # krawall-transport
//!
//! Connector implementations that actually cross the network: HTTP (C5),
//! raw WebSocket (C6), Server-Sent Events (C7) and dynamic gRPC (C8). Each
//! submodule is gated behind a feature flag of the same name so a binary
//! that only ever tests HTTP targets doesn't pull in `tonic`.
//!
//! Every connector here implements [`krawall_core::Connector`] and shares
//! the same request/response marshalling from `krawall-core` — the only
//! thing that differs module to module is how bytes get on and off the
//! wire.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "ws")]
pub mod ws;

#[cfg(feature = "sse")]
pub mod sse;

#[cfg(feature = "grpc")]
pub mod grpc;

#[cfg(feature = "http")]
pub use http::HttpConnector;

#[cfg(feature = "ws")]
pub use ws::WsConnector;

#[cfg(feature = "sse")]
pub use sse::SseConnector;

#[cfg(feature = "grpc")]
pub use grpc::GrpcConnector;
