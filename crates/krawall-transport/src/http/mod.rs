//! HTTP connector (spec.md §4.5, component C5).

mod client;
pub use client::HttpConnector;
