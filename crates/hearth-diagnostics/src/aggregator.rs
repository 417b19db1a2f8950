//! Diagnostic orchestration
//!
//! The runner executes the four probes and merges their results into one
//! [`DiagnosticReport`]. STUN, TURN, and media run concurrently; the
//! negotiation probe runs afterwards on its own, so its endpoint traffic is
//! never mixed up with the reachability exchanges. A probe that fails never
//! stops the others, and `run_diagnostics` itself cannot fail.

use crate::media::{MediaConstraints, MediaDevices, SystemMediaDevices};
use crate::negotiation::run_ice_probe;
use crate::probes::{run_media_probe, run_stun_probe, run_turn_probe};
use crate::report::{ConnectionTestKind, ConnectivityResult, DiagnosticReport};
use hearth_core::HearthError;
use hearth_ice::IceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunable deadlines plus the candidate server list
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Candidate servers used by every probe
    pub ice: IceConfig,
    /// Devices to request in the media probe
    pub media_constraints: MediaConstraints,
    /// Deadline for the STUN reachability probe
    pub stun_timeout: Duration,
    /// Deadline for the TURN reachability probe
    pub turn_timeout: Duration,
    /// Deadline for the full negotiation probe
    pub ice_timeout: Duration,
    /// Deadline for media acquisition
    pub media_timeout: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            media_constraints: MediaConstraints::default(),
            stun_timeout: Duration::from_secs(5),
            turn_timeout: Duration::from_secs(8),
            ice_timeout: Duration::from_secs(10),
            media_timeout: Duration::from_secs(15),
        }
    }
}

/// Condensed answer to "can this device connect at all?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivitySummary {
    /// True when at least one path to a candidate server exists
    pub can_connect: bool,
    /// One-line explanation
    pub details: String,
}

/// Executes probes and assembles reports
pub struct DiagnosticRunner {
    config: DiagnosticsConfig,
    media: Arc<dyn MediaDevices>,
}

impl DiagnosticRunner {
    /// Runner over the system media devices
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            config,
            media: Arc::new(SystemMediaDevices::default()),
        }
    }

    /// Runner with a caller-supplied media implementation
    pub fn with_media(config: DiagnosticsConfig, media: Arc<dyn MediaDevices>) -> Self {
        Self { config, media }
    }

    /// Run all probes and assemble the report
    ///
    /// Reachability and media probes run concurrently; the negotiation probe
    /// runs after they settle so its sockets see only their own traffic.
    pub async fn run_diagnostics(&self) -> DiagnosticReport {
        info!("starting diagnostic run");

        let (stun, turn, media) = tokio::join!(
            self.stun_slot(),
            self.turn_slot(),
            run_media_probe(
                self.media.as_ref(),
                &self.config.media_constraints,
                self.config.media_timeout,
            ),
        );
        let ice = run_ice_probe(&self.config.ice, self.config.ice_timeout).await;

        let report = DiagnosticReport {
            stun,
            turn,
            media,
            ice,
            network_type: detect_network_type(),
            bandwidth_estimate: None,
        };
        info!(
            passed = report.success_count(),
            network_type = report.network_type.as_deref().unwrap_or("unknown"),
            "diagnostic run finished"
        );
        report
    }

    /// Best-effort network classification; `"unknown"` when nothing can be
    /// determined. Never an error.
    pub fn network_type(&self) -> String {
        detect_network_type().unwrap_or_else(|| "unknown".to_string())
    }

    /// Just the reachability question, without media or negotiation
    pub async fn check_connectivity(&self) -> ConnectivitySummary {
        let (stun, turn) = tokio::join!(self.stun_slot(), self.turn_slot());
        let can_connect = stun.success || turn.success;
        let details = if stun.success {
            stun.details
        } else if turn.success {
            turn.details
        } else {
            format!("{}; {}", stun.details, turn.details)
        };
        ConnectivitySummary {
            can_connect,
            details,
        }
    }

    async fn stun_slot(&self) -> ConnectivityResult {
        match self.config.ice.stun_servers.first() {
            Some(server) => run_stun_probe(server, self.config.stun_timeout).await,
            None => ConnectivityResult::failed(
                ConnectionTestKind::Stun,
                "no STUN servers configured",
                Duration::ZERO,
                HearthError::invalid("STUN server list is empty"),
            ),
        }
    }

    async fn turn_slot(&self) -> ConnectivityResult {
        match self.config.ice.turn_servers.first() {
            Some(server) => run_turn_probe(server, self.config.turn_timeout).await,
            None => ConnectivityResult::failed(
                ConnectionTestKind::Turn,
                "no TURN servers configured",
                Duration::ZERO,
                HearthError::invalid("TURN server list is empty"),
            ),
        }
    }
}

/// Best-effort link classification from sysfs; `None` when undeterminable
fn detect_network_type() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut classification = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }
        if entry.path().join("wireless").is_dir() {
            return Some("wifi".to_string());
        }
        classification = Some("ethernet".to_string());
    }
    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ScriptedMediaDevices;

    fn local_config() -> DiagnosticsConfig {
        DiagnosticsConfig {
            ice: IceConfig::local_only(),
            stun_timeout: Duration::from_millis(300),
            turn_timeout: Duration::from_millis(300),
            ice_timeout: Duration::from_secs(5),
            media_timeout: Duration::from_secs(1),
            ..DiagnosticsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_server_lists_produce_failed_slots() {
        let runner = DiagnosticRunner::with_media(
            local_config(),
            Arc::new(ScriptedMediaDevices::granting()),
        );
        let report = runner.run_diagnostics().await;

        assert!(!report.stun.success);
        assert!(!report.turn.success);
        assert!(report.stun.details.contains("no STUN servers"));
        assert!(report.turn.details.contains("no TURN servers"));
        // Loopback negotiation works with no servers at all.
        assert!(report.ice.success, "details: {}", report.ice.details);
        assert!(report.media.success);
    }

    #[test]
    fn test_network_type_is_always_a_label() {
        let runner = DiagnosticRunner::new(DiagnosticsConfig::default());
        let label = runner.network_type();
        assert!(["wifi", "ethernet", "unknown"].contains(&label.as_str()));
    }

    #[tokio::test]
    async fn test_check_connectivity_false_without_any_path() {
        let mut config = local_config();
        config.ice = IceConfig::single_stun("192.0.2.1:3478");
        let runner =
            DiagnosticRunner::with_media(config, Arc::new(ScriptedMediaDevices::granting()));

        let summary = runner.check_connectivity().await;
        assert!(!summary.can_connect);
        assert!(!summary.details.is_empty());
    }
}
