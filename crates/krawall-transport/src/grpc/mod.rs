//! Dynamic gRPC connector (spec.md §4.8, component C8).

mod client;
pub use client::GrpcConnector;
