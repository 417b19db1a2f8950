//! TURN relay reachability client
//!
//! Sends an Allocate request and waits for any well-formed TURN answer. A
//! 401 challenge counts as reachable: the relay is up and speaking TURN,
//! which is what the diagnostics need to know. Completing an authenticated
//! allocation is out of scope for this subsystem.

use crate::config::TurnServer;
use crate::message::{message_type, StunMessage};
use crate::stun::resolve_server;
use hearth_core::{HearthError, Result};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of one reachability exchange with a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnProbeOutcome {
    /// Wall-clock time between request and matching response
    pub round_trip: Duration,
    /// True when the relay granted the allocation outright
    pub allocated: bool,
    /// Error code from the relay, when it answered with one (401 expected)
    pub error_code: Option<u16>,
}

/// Client for TURN Allocate reachability exchanges
#[derive(Debug, Clone)]
pub struct TurnClient {
    /// Per-request deadline
    pub request_timeout: Duration,
}

impl Default for TurnClient {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(2500),
        }
    }
}

impl TurnClient {
    /// Probe `server` for reachability
    ///
    /// Binds its own ephemeral socket; the socket is released when the probe
    /// returns, on every exit path.
    pub async fn probe(&self, server: &TurnServer) -> Result<TurnProbeOutcome> {
        let server_addr = resolve_server(&server.address).await?;
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| HearthError::network(format!("failed to bind probe socket: {e}")))?;

        let request = StunMessage::allocate_request().with_username(&server.username);
        let transaction_id = request.transaction_id;
        let started = Instant::now();

        socket
            .send_to(&request.encode(), server_addr)
            .await
            .map_err(|e| HearthError::network(format!("failed to send Allocate request: {e}")))?;

        let response = timeout(self.request_timeout, async {
            let mut buf = vec![0u8; 1500];
            loop {
                let (len, _from) = socket.recv_from(&mut buf).await.map_err(|e| {
                    HearthError::network(format!("failed to receive Allocate response: {e}"))
                })?;
                match StunMessage::decode(&buf[..len]) {
                    Ok(msg) if msg.transaction_id == transaction_id => return Ok::<_, HearthError>(msg),
                    Ok(_) => debug!("ignoring TURN packet with mismatched transaction id"),
                    Err(_) => debug!("ignoring non-STUN packet while awaiting Allocate response"),
                }
            }
        })
        .await
        .map_err(|_| HearthError::timeout("TURN Allocate request timed out"))??;

        let round_trip = started.elapsed();
        match response.message_type {
            message_type::ALLOCATE_RESPONSE => Ok(TurnProbeOutcome {
                round_trip,
                allocated: true,
                error_code: None,
            }),
            message_type::ALLOCATE_ERROR => {
                let code = response.error_code();
                debug!(server = %server.address, code = ?code, "relay answered Allocate with error");
                Ok(TurnProbeOutcome {
                    round_trip,
                    allocated: false,
                    error_code: code,
                })
            }
            other => Err(HearthError::protocol(format!(
                "unexpected response type {other:#06x} to Allocate"
            ))),
        }
    }
}
