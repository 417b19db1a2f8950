//! ICE-style connectivity primitives for Hearth
//!
//! This crate provides the peer endpoint used by the diagnostics engine: a
//! UDP endpoint that gathers host and server-reflexive candidates, exchanges
//! opaque offer/answer descriptions, runs STUN connectivity checks against
//! remote candidates, and completes an in-band channel handshake as proof of
//! a working path.
//!
//! Completion is exposed through channels and futures rather than callbacks:
//! candidates arrive on an event receiver, connection state on a watch
//! channel, and channel-open on a future that resolves at most once.

pub mod candidate;
pub mod config;
pub mod endpoint;
pub mod message;
pub mod session;
pub mod stun;
pub mod turn;

pub use candidate::{Candidate, CandidateKind};
pub use config::{IceConfig, TurnServer};
pub use endpoint::{ChannelHandle, ConnectionState, PeerEndpoint};
pub use session::{DescriptionKind, SessionDescription};
pub use stun::{BindingOutcome, StunClient};
pub use turn::{TurnClient, TurnProbeOutcome};
