//! Full local negotiation probe
//!
//! Builds two peer endpoints in the same process, wires their candidate
//! streams to each other, and runs a complete offer/answer negotiation.
//! Success requires both a confirmed connectivity check and an open channel
//! on at least one side; reaching `Connected` with no channel is still a
//! failure, because the application needs a usable path, not just a check.

use crate::report::{ConnectionTestKind, ConnectivityResult};
use hearth_core::HearthError;
use hearth_ice::{ConnectionState, IceConfig, PeerEndpoint};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run one complete local negotiation under `config`, bounded by `deadline`
pub async fn run_ice_probe(config: &IceConfig, deadline: Duration) -> ConnectivityResult {
    let started = Instant::now();
    debug!("starting negotiation probe");

    let (a, b) = match bind_pair(config).await {
        Ok(pair) => pair,
        Err(e) => {
            return ConnectivityResult::failed(
                ConnectionTestKind::Ice,
                "could not bind negotiation endpoints",
                started.elapsed(),
                e,
            );
        }
    };

    // Wire candidate events across before negotiation starts, so candidates
    // produced during gathering are forwarded even when they race ahead of
    // the remote description.
    let forwarders = match (forward_candidates(&a, &b), forward_candidates(&b, &a)) {
        (Ok(ab), Ok(ba)) => vec![ab, ba],
        (ab, ba) => {
            for task in [ab, ba].into_iter().flatten() {
                task.abort();
            }
            a.close();
            b.close();
            return ConnectivityResult::failed(
                ConnectionTestKind::Ice,
                "could not wire candidate forwarding between endpoints",
                started.elapsed(),
                HearthError::internal("candidate events already taken"),
            );
        }
    };

    let result = match drive_negotiation(&a, &b, deadline, started).await {
        Ok(result) => result,
        Err(e) => ConnectivityResult::failed(
            ConnectionTestKind::Ice,
            "offer/answer exchange failed",
            started.elapsed(),
            e,
        ),
    };

    a.close();
    b.close();
    for task in forwarders {
        task.abort();
    }
    result
}

async fn bind_pair(config: &IceConfig) -> hearth_core::Result<(Arc<PeerEndpoint>, Arc<PeerEndpoint>)> {
    let a = Arc::new(PeerEndpoint::bind(config.clone()).await?);
    let b = Arc::new(PeerEndpoint::bind(config.clone()).await?);
    Ok((a, b))
}

async fn drive_negotiation(
    a: &Arc<PeerEndpoint>,
    b: &Arc<PeerEndpoint>,
    deadline: Duration,
    started: Instant,
) -> hearth_core::Result<ConnectivityResult> {
    let _channel = a.open_channel("diag")?;
    let offer = a.create_offer().await?;
    b.set_remote_description(offer).await?;
    let answer = b.create_answer().await?;
    a.set_remote_description(answer).await?;

    let result = loop {
        let state = a.state();
        let remote_state = b.state();
        let channel_open = a.channel_open() || b.channel_open();
        if state == ConnectionState::Connected && channel_open {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "negotiation probe succeeded");
            break ConnectivityResult::passed(
                ConnectionTestKind::Ice,
                "negotiation connected and opened a channel",
                started.elapsed(),
            );
        }
        // A dead endpoint on either side settles the outcome immediately;
        // waiting out the deadline would only delay the same answer.
        let dead = |s: ConnectionState| {
            matches!(s, ConnectionState::Failed | ConnectionState::Closed)
        };
        if dead(state) || dead(remote_state) {
            break ConnectivityResult::failed(
                ConnectionTestKind::Ice,
                format!(
                    "negotiation ended with endpoints in {state:?} and {remote_state:?} \
                     before a channel opened"
                ),
                started.elapsed(),
                HearthError::network("negotiation failed"),
            );
        }
        if started.elapsed() > deadline {
            break ConnectivityResult::failed(
                ConnectionTestKind::Ice,
                format!(
                    "no connected channel within {}s (last state {state:?})",
                    deadline.as_secs()
                ),
                started.elapsed(),
                HearthError::timeout("negotiation probe timed out"),
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    Ok(result)
}

/// Forward every candidate `from` gathers into `to`
fn forward_candidates(
    from: &Arc<PeerEndpoint>,
    to: &Arc<PeerEndpoint>,
) -> hearth_core::Result<JoinHandle<()>> {
    let mut events = from
        .candidate_events()
        .ok_or_else(|| HearthError::internal("candidate events already taken"))?;
    let to = Arc::clone(to);
    Ok(tokio::spawn(async move {
        while let Some(candidate) = events.recv().await {
            if to.add_remote_candidate(candidate).is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_negotiation_passes() {
        let result = run_ice_probe(&IceConfig::local_only(), Duration::from_secs(5)).await;
        assert!(result.success, "details: {}", result.details);
        assert_eq!(result.kind, ConnectionTestKind::Ice);
        assert!(result.round_trip_ms.is_some());
    }

    #[tokio::test]
    async fn test_remote_endpoint_death_fails_fast() {
        let a = Arc::new(PeerEndpoint::bind(IceConfig::local_only()).await.unwrap());
        let b = Arc::new(PeerEndpoint::bind(IceConfig::local_only()).await.unwrap());

        // No candidate forwarding, so the pair can never connect; B dies
        // shortly after the exchange and the loop must notice.
        let doomed = Arc::clone(&b);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            doomed.close();
        });

        let started = Instant::now();
        let result = drive_negotiation(&a, &b, Duration::from_secs(10), started)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.details.contains("Closed"), "details: {}", result.details);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "fail-fast took {:?}",
            started.elapsed()
        );
        a.close();
    }

    #[tokio::test]
    async fn test_forwarding_requires_untaken_event_stream() {
        let a = Arc::new(PeerEndpoint::bind(IceConfig::local_only()).await.unwrap());
        let b = Arc::new(PeerEndpoint::bind(IceConfig::local_only()).await.unwrap());
        drop(a.candidate_events());

        let err = forward_candidates(&a, &b).unwrap_err();
        assert!(matches!(err, HearthError::Internal { .. }));
        a.close();
        b.close();
    }

    #[tokio::test]
    async fn test_unreachable_servers_do_not_block_local_path() {
        // Gathering against a dead server slows the probe down but host
        // candidates still carry the negotiation.
        let config = IceConfig::single_stun("192.0.2.1:3478");
        let result = run_ice_probe(&config, Duration::from_secs(15)).await;
        assert!(result.success, "details: {}", result.details);
    }
}
