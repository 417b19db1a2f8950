//! Bounded reachability probes
//!
//! Each probe races its work against a caller-supplied deadline and always
//! returns a [`ConnectivityResult`]; socket errors, protocol errors, and
//! timeouts become failed results with the cause attached.

use crate::media::{MediaConstraints, MediaDevices};
use crate::report::{ConnectionTestKind, ConnectivityResult};
use hearth_core::HearthError;
use hearth_ice::config::TurnServer;
use hearth_ice::turn::TurnClient;
use hearth_ice::{CandidateKind, IceConfig, PeerEndpoint};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// STUN reachability: gather through exactly the one server under test
///
/// Binds a minimal endpoint, opens an auxiliary channel to trigger
/// gathering, and passes on the first server-reflexive candidate. The
/// endpoint is closed on every exit path.
pub async fn run_stun_probe(server: &str, deadline: Duration) -> ConnectivityResult {
    let started = Instant::now();
    debug!(server = %server, "starting STUN probe");

    let endpoint = match PeerEndpoint::bind(IceConfig::single_stun(server)).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            return ConnectivityResult::failed(
                ConnectionTestKind::Stun,
                "could not bind a probe endpoint",
                started.elapsed(),
                e,
            );
        }
    };
    let Some(mut events) = endpoint.candidate_events() else {
        endpoint.close();
        return ConnectivityResult::failed(
            ConnectionTestKind::Stun,
            "probe endpoint had no candidate stream",
            started.elapsed(),
            HearthError::internal("candidate events already taken"),
        );
    };
    if let Err(e) = endpoint.open_channel("probe") {
        endpoint.close();
        return ConnectivityResult::failed(
            ConnectionTestKind::Stun,
            "could not trigger candidate gathering",
            started.elapsed(),
            e,
        );
    }

    let reflexive = timeout(deadline, async {
        while let Some(candidate) = events.recv().await {
            if candidate.kind == CandidateKind::ServerReflexive {
                return Some(candidate);
            }
        }
        None
    })
    .await;
    endpoint.close();

    match reflexive {
        Ok(Some(candidate)) => {
            info!(server = %server, mapped = %candidate.address, "STUN probe succeeded");
            ConnectivityResult::passed(
                ConnectionTestKind::Stun,
                format!(
                    "server-reflexive address {} via {server}",
                    candidate.address
                ),
                started.elapsed(),
            )
        }
        Ok(None) => ConnectivityResult::failed(
            ConnectionTestKind::Stun,
            format!("gathering via {server} produced no server-reflexive candidate"),
            started.elapsed(),
            HearthError::network("no server-reflexive candidate gathered"),
        ),
        Err(_) => ConnectivityResult::failed(
            ConnectionTestKind::Stun,
            format!(
                "no server-reflexive candidate via {server} within {}s",
                deadline.as_secs()
            ),
            started.elapsed(),
            HearthError::timeout("STUN probe timed out"),
        ),
    }
}

/// TURN reachability: one Allocate exchange against `server`
///
/// Any well-formed TURN answer counts as reachable, including the 401
/// credential challenge a long-term-auth relay sends first.
pub async fn run_turn_probe(server: &TurnServer, deadline: Duration) -> ConnectivityResult {
    let started = Instant::now();
    debug!(server = %server.address, "starting TURN probe");

    let client = TurnClient {
        request_timeout: deadline,
    };
    match client.probe(server).await {
        Ok(outcome) => {
            let details = if outcome.allocated {
                format!("relay {} granted an allocation", server.address)
            } else {
                format!(
                    "relay {} is reachable (answered Allocate with code {})",
                    server.address,
                    outcome
                        .error_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            };
            info!(server = %server.address, allocated = outcome.allocated, "TURN probe succeeded");
            ConnectivityResult::passed(ConnectionTestKind::Turn, details, started.elapsed())
        }
        Err(e @ HearthError::Timeout { .. }) => ConnectivityResult::failed(
            ConnectionTestKind::Turn,
            format!(
                "no Allocate response from {} within {}s",
                server.address,
                deadline.as_secs()
            ),
            started.elapsed(),
            e,
        ),
        Err(e) => ConnectivityResult::failed(
            ConnectionTestKind::Turn,
            format!("Allocate exchange with {} failed", server.address),
            started.elapsed(),
            e,
        ),
    }
}

/// Media access: acquire matching devices, then release immediately
pub async fn run_media_probe(
    devices: &dyn MediaDevices,
    constraints: &MediaConstraints,
    deadline: Duration,
) -> ConnectivityResult {
    let started = Instant::now();
    debug!(audio = constraints.audio, video = constraints.video, "starting media probe");

    match timeout(deadline, devices.acquire(constraints)).await {
        Ok(Ok(handle)) => {
            // The probe only proves access; hold nothing afterwards.
            devices.release(handle).await;
            ConnectivityResult::passed(
                ConnectionTestKind::Media,
                "camera/microphone access granted",
                started.elapsed(),
            )
        }
        Ok(Err(failure)) => {
            let details = failure.details();
            ConnectivityResult::failed(
                ConnectionTestKind::Media,
                details,
                started.elapsed(),
                failure.into_error(),
            )
        }
        Err(_) => ConnectivityResult::failed(
            ConnectionTestKind::Media,
            format!(
                "media acquisition did not settle within {}s",
                deadline.as_secs()
            ),
            started.elapsed(),
            HearthError::timeout("media probe timed out"),
        ),
    }
}
