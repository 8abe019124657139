//! # krawall-socketio
//!
//! Engine.IO/Socket.IO framing over a raw WebSocket (spec.md §4.11/§4.12,
//! components C11/C12). [`frame`] is the pure wire-format layer;
//! [`SocketIoConnector`] drives an actual socket with it.

mod client;
mod frame;

pub use client::SocketIoConnector;
pub use frame::{decode_engine_io, decode_socket_io, EngineIoPacket, SocketIoPacket};
