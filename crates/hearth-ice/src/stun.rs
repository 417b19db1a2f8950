//! STUN binding client
//!
//! One binding round trip on a borrowed socket. The peer endpoint calls this
//! during gathering to learn its server-reflexive address, and the STUN
//! probe reuses the same exchange through an endpoint configured with a
//! single server.

use crate::message::StunMessage;
use hearth_core::{HearthError, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of one successful binding exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOutcome {
    /// Our address as the server saw it
    pub mapped_address: SocketAddr,
    /// Wall-clock time between request and matching response
    pub round_trip: Duration,
}

/// Client for RFC 5389 binding exchanges
#[derive(Debug, Clone)]
pub struct StunClient {
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Attempts before giving up on a server
    pub retry_attempts: u32,
}

impl Default for StunClient {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1500),
            retry_attempts: 3,
        }
    }
}

impl StunClient {
    /// Run a binding exchange against `server` using the caller's socket
    ///
    /// The socket is borrowed, not owned: the endpoint keeps using the same
    /// socket afterwards so the reflexive mapping stays valid for it.
    pub async fn binding(&self, socket: &UdpSocket, server: &str) -> Result<BindingOutcome> {
        let server_addr = resolve_server(server).await?;

        let mut last_err = HearthError::network(format!("no attempts made against {server}"));
        for attempt in 1..=self.retry_attempts {
            debug!(server = %server, attempt, "sending STUN binding request");
            match self.exchange(socket, server_addr).await {
                Ok(outcome) => {
                    debug!(
                        server = %server,
                        mapped = %outcome.mapped_address,
                        rtt_ms = outcome.round_trip.as_millis() as u64,
                        "STUN binding succeeded"
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    debug!(server = %server, attempt, error = %e, "STUN binding attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn exchange(&self, socket: &UdpSocket, server_addr: SocketAddr) -> Result<BindingOutcome> {
        let request = StunMessage::binding_request();
        let transaction_id = request.transaction_id;
        let started = Instant::now();

        socket
            .send_to(&request.encode(), server_addr)
            .await
            .map_err(|e| HearthError::network(format!("failed to send binding request: {e}")))?;

        let response = timeout(
            self.request_timeout,
            receive_matching(socket, transaction_id),
        )
        .await
        .map_err(|_| HearthError::timeout("STUN binding request timed out"))??;

        let mapped_address = response.mapped_address()?;
        Ok(BindingOutcome {
            mapped_address,
            round_trip: started.elapsed(),
        })
    }
}

/// Wait for a success response matching `transaction_id`, skipping strays
async fn receive_matching(socket: &UdpSocket, transaction_id: [u8; 12]) -> Result<StunMessage> {
    let mut buf = vec![0u8; 1024];
    loop {
        let (len, _from) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| HearthError::network(format!("failed to receive response: {e}")))?;

        let Ok(message) = StunMessage::decode(&buf[..len]) else {
            debug!("ignoring non-STUN packet while awaiting binding response");
            continue;
        };
        if message.transaction_id != transaction_id {
            debug!("ignoring STUN packet with mismatched transaction id");
            continue;
        }
        if message.is_error_response() {
            return Err(HearthError::network(format!(
                "STUN error response (code {:?})",
                message.error_code()
            )));
        }
        if message.is_success_response() {
            return Ok(message);
        }
    }
}

/// Resolve a `host:port` (or URL-prefixed) server string to a socket address
pub async fn resolve_server(server: &str) -> Result<SocketAddr> {
    // Accept "stun:host:port" style prefixes as well as bare host:port
    let host_port = match server.rsplit_once("://") {
        Some((_, rest)) => rest,
        None => server.strip_prefix("stun:").unwrap_or(server),
    }
    .to_string();

    let addrs: Vec<SocketAddr> = tokio::task::spawn_blocking(move || {
        host_port
            .to_socket_addrs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    })
    .await
    .map_err(|e| HearthError::internal(format!("resolver task failed: {e}")))?;

    addrs
        .into_iter()
        .next()
        .ok_or_else(|| HearthError::network(format!("failed to resolve server: {server}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::message_type;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_resolve_plain_host_port() {
        let addr = resolve_server("127.0.0.1:19302").await.unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 19302);
    }

    #[tokio::test]
    async fn test_resolve_strips_scheme() {
        let addr = resolve_server("stun:127.0.0.1:3478").await.unwrap();
        assert_eq!(addr.port(), 3478);
    }

    #[tokio::test]
    async fn test_resolve_invalid_fails() {
        assert!(resolve_server("definitely-not-a-host.invalid:99999")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_binding_against_local_responder() {
        // A one-shot fake STUN server on loopback.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let request = StunMessage::decode(&buf[..len]).unwrap();
            assert_eq!(request.message_type, message_type::BINDING_REQUEST);
            let response = StunMessage::binding_response(request.transaction_id, from);
            server.send_to(&response.encode(), from).await.unwrap();
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = StunClient::default();
        let outcome = client
            .binding(&socket, &server_addr.to_string())
            .await
            .unwrap();
        assert_eq!(outcome.mapped_address, socket.local_addr().unwrap());
        assert!(outcome.round_trip < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_binding_times_out_against_silence() {
        let client = StunClient {
            request_timeout: Duration::from_millis(100),
            retry_attempts: 1,
        };
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // RFC 5737 test address, nothing listens there
        let err = client.binding(&socket, "192.0.2.1:3478").await.unwrap_err();
        assert!(matches!(err, HearthError::Timeout { .. }));
    }
}
