//! Server-Sent Events connector (spec.md §4.7, component C7).

mod client;
pub use client::SseConnector;
