//! Connectivity diagnostics for Hearth
//!
//! Answers one question for the app: can this device establish a real-time
//! peer path, and if not, what should the user look at? Four bounded probes
//! (STUN reachability, TURN reachability, media-device access, and a full
//! local negotiation) each produce an immutable [`ConnectivityResult`]; the
//! aggregator merges them into a [`DiagnosticReport`] and renders it as
//! text. Probe failures are data, never errors; nothing a probe hits
//! escapes to the caller.

pub mod aggregator;
pub mod format;
pub mod media;
pub mod negotiation;
pub mod probes;
pub mod report;

pub use aggregator::{ConnectivitySummary, DiagnosticRunner, DiagnosticsConfig};
pub use format::format_diagnostic_results;
pub use media::{
    MediaConstraints, MediaDevices, MediaFailure, MediaHandle, ScriptedMediaDevices,
    SystemMediaDevices,
};
pub use negotiation::run_ice_probe;
pub use probes::{run_media_probe, run_stun_probe, run_turn_probe};
pub use report::{ConnectionTestKind, ConnectivityResult, DiagnosticReport};
