//! # krawall-browser
//!
//! Browser-mediated WebSocket discovery (spec.md §4.9, component C9) and
//! Engine.IO/Socket.IO frame classification (spec.md §4.10, component
//! C10). This crate is the only place in the workspace that drives an
//! actual browser — everything downstream consumes its output
//! ([`krawall_core::DiscoveryResult`]) as plain data.

mod classify;
mod discover;
mod launch;

pub use classify::classify;
pub use discover::{
    discover, discover_with_options, DiscoveryOptions, ProgressEvent, ProgressSender, WidgetStep,
    WidgetStrategy,
};
pub use launch::{launch, shared_browser, LaunchConfig};
