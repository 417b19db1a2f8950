//! Signaling transport guard for Hearth
//!
//! Some retired signaling endpoints still live in cached client configs, and
//! dialing them wastes sockets and log volume on connections that can never
//! succeed. This crate puts a factory seam in front of WebSocket
//! construction: URLs matching the blocklist get a synthetic connection that
//! fails protocol-correctly (one error event, one close event, state
//! `Closed`), while everything else reaches the real transport unmodified.

pub mod factory;
pub mod patterns;
pub mod socket;

pub use factory::{
    install_connection_guard, signaling_factory, GuardedFactory, SocketFactory, WebSocketFactory,
};
pub use patterns::BlockedPatterns;
pub use socket::{InterceptedConnectionState, SignalingSocket, SocketEvent, SYNTHETIC_CLOSE_CODE};
