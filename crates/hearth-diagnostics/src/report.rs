//! Probe result and report data model
//!
//! A `ConnectivityResult` is immutable once produced and only constructed
//! through [`ConnectivityResult::passed`] / [`ConnectivityResult::failed`],
//! so a successful result can never carry a failure and vice versa.

use hearth_core::HearthError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which probe produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionTestKind {
    /// STUN reachability
    Stun,
    /// TURN relay reachability
    Turn,
    /// Full local negotiation
    Ice,
    /// Camera/microphone access
    Media,
    /// Bandwidth estimation
    Bandwidth,
    /// Anything else
    General,
}

impl ConnectionTestKind {
    /// Human-facing label used by the report formatter
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stun => "STUN",
            Self::Turn => "TURN",
            Self::Ice => "ICE negotiation",
            Self::Media => "Media devices",
            Self::Bandwidth => "Bandwidth",
            Self::General => "General",
        }
    }
}

/// Outcome of one probe invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityResult {
    /// Whether the probe passed
    pub success: bool,
    /// Which probe ran
    pub kind: ConnectionTestKind,
    /// Human-readable outcome description
    pub details: String,
    /// Unix timestamp in milliseconds when the result was decided
    pub observed_at: u64,
    /// Wall-clock elapsed between probe start and decision
    pub round_trip_ms: Option<f64>,
    /// Failure cause; present exactly when `success` is false
    pub failure: Option<HearthError>,
}

impl ConnectivityResult {
    /// A successful probe outcome
    pub fn passed(kind: ConnectionTestKind, details: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            kind,
            details: details.into(),
            observed_at: now_millis(),
            round_trip_ms: Some(elapsed.as_secs_f64() * 1000.0),
            failure: None,
        }
    }

    /// A failed probe outcome; timeouts and denials land here, not in `Err`
    pub fn failed(
        kind: ConnectionTestKind,
        details: impl Into<String>,
        elapsed: Duration,
        failure: HearthError,
    ) -> Self {
        Self {
            success: false,
            kind,
            details: details.into(),
            observed_at: now_millis(),
            round_trip_ms: Some(elapsed.as_secs_f64() * 1000.0),
            failure: Some(failure),
        }
    }
}

/// Aggregate outcome of one diagnostic run
///
/// Built once per `run_diagnostics` call; every slot is always populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// STUN reachability result
    pub stun: ConnectivityResult,
    /// TURN reachability result
    pub turn: ConnectivityResult,
    /// Media access result
    pub media: ConnectivityResult,
    /// Full negotiation result
    pub ice: ConnectivityResult,
    /// Best-effort network classification, if one could be made
    pub network_type: Option<String>,
    /// Bandwidth estimate in kbit/s, when a measurement exists
    pub bandwidth_estimate: Option<f64>,
}

impl DiagnosticReport {
    /// Results in the fixed rendering order: STUN, TURN, Media, Ice
    pub fn ordered_results(&self) -> [&ConnectivityResult; 4] {
        [&self.stun, &self.turn, &self.media, &self.ice]
    }

    /// Number of probes that passed (0..=4)
    pub fn success_count(&self) -> usize {
        self.ordered_results().iter().filter(|r| r.success).count()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
