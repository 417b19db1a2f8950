//! Plain-text report rendering

use crate::report::{ConnectionTestKind, DiagnosticReport};
use std::fmt::Write;

/// Render `report` as the user-facing diagnostic text
///
/// Fixed layout: score line, network type, one status line per probe, then
/// failure details and hints only for the probes that failed.
pub fn format_diagnostic_results(report: &DiagnosticReport) -> String {
    let mut out = String::new();
    let score = report.success_count() * 100 / report.ordered_results().len();
    let _ = writeln!(out, "Connectivity check: {score}% of probes passed");
    let _ = writeln!(
        out,
        "Network type: {}",
        report.network_type.as_deref().unwrap_or("unknown")
    );
    if let Some(kbps) = report.bandwidth_estimate {
        let _ = writeln!(out, "Bandwidth estimate: {kbps:.0} kbit/s");
    }
    out.push('\n');

    for result in report.ordered_results() {
        let mark = if result.success { '✓' } else { '✗' };
        let _ = writeln!(out, "{mark} {}", result.kind.label());
    }

    let failures: Vec<_> = report
        .ordered_results()
        .into_iter()
        .filter(|r| !r.success)
        .collect();
    if !failures.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Problems:");
        for result in &failures {
            let _ = writeln!(out, "  - {}: {}", result.kind.label(), result.details);
        }
    }

    let network_failed = failures
        .iter()
        .any(|r| matches!(r.kind, ConnectionTestKind::Stun | ConnectionTestKind::Turn));
    if network_failed {
        out.push('\n');
        let _ = writeln!(out, "Network hints:");
        let _ = writeln!(out, "  - Check that this device is online.");
        let _ = writeln!(
            out,
            "  - A firewall or restrictive NAT may be blocking UDP; try another network."
        );
    }

    if failures
        .iter()
        .any(|r| r.kind == ConnectionTestKind::Media)
    {
        out.push('\n');
        let _ = writeln!(out, "Media hints:");
        let _ = writeln!(
            out,
            "  - Grant camera and microphone permissions, then run the check again."
        );
        let _ = writeln!(
            out,
            "  - Close other applications that may be holding the devices."
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ConnectivityResult;
    use hearth_core::HearthError;
    use std::time::Duration;

    fn pass(kind: ConnectionTestKind) -> ConnectivityResult {
        ConnectivityResult::passed(kind, "ok", Duration::from_millis(10))
    }

    fn fail(kind: ConnectionTestKind, details: &str) -> ConnectivityResult {
        ConnectivityResult::failed(
            kind,
            details,
            Duration::from_millis(10),
            HearthError::network(details),
        )
    }

    #[test]
    fn test_all_passing_report_has_no_hints() {
        let report = DiagnosticReport {
            stun: pass(ConnectionTestKind::Stun),
            turn: pass(ConnectionTestKind::Turn),
            media: pass(ConnectionTestKind::Media),
            ice: pass(ConnectionTestKind::Ice),
            network_type: Some("ethernet".to_string()),
            bandwidth_estimate: None,
        };
        let text = format_diagnostic_results(&report);
        assert!(text.contains("100% of probes passed"));
        assert!(text.contains("Network type: ethernet"));
        assert!(!text.contains("hints:"));
        assert!(!text.contains("Problems:"));
    }

    #[test]
    fn test_media_failure_yields_media_hints_only() {
        let report = DiagnosticReport {
            stun: pass(ConnectionTestKind::Stun),
            turn: pass(ConnectionTestKind::Turn),
            media: fail(ConnectionTestKind::Media, "permission denied"),
            ice: pass(ConnectionTestKind::Ice),
            network_type: None,
            bandwidth_estimate: None,
        };
        let text = format_diagnostic_results(&report);
        assert!(text.contains("75% of probes passed"));
        assert!(text.contains("Network type: unknown"));
        assert!(text.contains("Media hints:"));
        assert!(!text.contains("Network hints:"));
        assert!(text.contains("Media devices: permission denied"));
    }

    #[test]
    fn test_network_failure_yields_network_hints() {
        let report = DiagnosticReport {
            stun: fail(ConnectionTestKind::Stun, "timed out"),
            turn: fail(ConnectionTestKind::Turn, "timed out"),
            media: pass(ConnectionTestKind::Media),
            ice: fail(ConnectionTestKind::Ice, "no channel"),
            network_type: None,
            bandwidth_estimate: None,
        };
        let text = format_diagnostic_results(&report);
        assert!(text.contains("25% of probes passed"));
        assert!(text.contains("Network hints:"));
        assert!(!text.contains("Media hints:"));
        // Status lines keep their fixed order.
        let stun_pos = text.find("✗ STUN").unwrap();
        let turn_pos = text.find("✗ TURN").unwrap();
        let media_pos = text.find("✓ Media devices").unwrap();
        let ice_pos = text.find("✗ ICE negotiation").unwrap();
        assert!(stun_pos < turn_pos && turn_pos < media_pos && media_pos < ice_pos);
    }
}
