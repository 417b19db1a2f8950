//! Peer endpoint with channel-based negotiation
//!
//! A `PeerEndpoint` owns one UDP socket and a driver task. Candidate
//! gathering stays dormant until a channel is requested; gathered candidates
//! are published on an event receiver; connection state is a watch channel
//! the caller can await. Connectivity checks are STUN binding requests with
//! `USERNAME = remote_ufrag:local_ufrag`; the endpoint reports `Connected`
//! only after one of its own checks completes a round trip. After that the
//! offering side runs a small open/ack datagram handshake to prove the
//! channel, which is what the diagnostics treat as end-to-end success.
//!
//! Remote candidates may arrive before the remote description. They are
//! buffered and applied when the description lands; arrival order never
//! causes loss.

use crate::candidate::{Candidate, CandidateKind};
use crate::config::IceConfig;
use crate::message::StunMessage;
use crate::session::{self, DescriptionKind, SessionDescription};
use crate::stun::StunClient;
use hearth_core::{HearthError, Result};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

const CHECK_INTERVAL: Duration = Duration::from_millis(250);
const MAX_OUTSTANDING_CHECKS: usize = 64;
const CHANNEL_PREFIX: &str = "hearthchan";

/// Aggregate endpoint connection state, single forward path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Freshly bound, nothing requested yet
    New,
    /// Candidate gathering in progress
    Gathering,
    /// Checks running against remote candidates
    Connecting,
    /// A connectivity check completed a round trip
    Connected,
    /// The endpoint gave up
    Failed,
    /// Closed by the owner; terminal
    Closed,
}

/// Handle to a requested channel
///
/// `opened()` resolves once the in-band handshake completes on this side.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    label: String,
    open_rx: watch::Receiver<bool>,
}

impl ChannelHandle {
    /// Label the channel was requested with
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True once the handshake has completed
    pub fn is_open(&self) -> bool {
        *self.open_rx.borrow()
    }

    /// Wait until the channel reports open
    pub async fn opened(&mut self) -> Result<()> {
        self.open_rx
            .wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| HearthError::internal("endpoint driver stopped"))
    }
}

enum Command {
    OpenChannel {
        label: String,
    },
    CreateOffer {
        reply: oneshot::Sender<Result<SessionDescription>>,
    },
    CreateAnswer {
        reply: oneshot::Sender<Result<SessionDescription>>,
    },
    SetRemoteDescription {
        desc: SessionDescription,
        reply: oneshot::Sender<Result<()>>,
    },
    AddRemoteCandidate(Candidate),
    Close,
}

/// One negotiating endpoint
pub struct PeerEndpoint {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    channel_rx: watch::Receiver<bool>,
    candidate_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Candidate>>>,
    local_addr: SocketAddr,
}

impl PeerEndpoint {
    /// Bind a fresh endpoint and start its driver task
    pub async fn bind(config: IceConfig) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| HearthError::network(format!("failed to bind endpoint socket: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| HearthError::network(format!("failed to read local address: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let (channel_tx, channel_rx) = watch::channel(false);
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            socket: Arc::new(socket),
            config,
            stun: StunClient::default(),
            ufrag: session::generate_ufrag(),
            pwd: session::generate_pwd(),
            channel_label: None,
            role: None,
            remote: None,
            pending_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            outstanding: HashMap::new(),
            selected: None,
            gathered: false,
            state_tx,
            channel_tx,
            candidate_tx,
        };
        tokio::spawn(driver.run(cmd_rx));

        Ok(Self {
            cmd_tx,
            state_rx,
            channel_rx,
            candidate_rx: std::sync::Mutex::new(Some(candidate_rx)),
            local_addr,
        })
    }

    /// Request a channel; this is what triggers candidate gathering
    pub fn open_channel(&self, label: &str) -> Result<ChannelHandle> {
        self.send(Command::OpenChannel {
            label: label.to_string(),
        })?;
        Ok(ChannelHandle {
            label: label.to_string(),
            open_rx: self.channel_rx.clone(),
        })
    }

    /// Take the stream of locally gathered candidates
    ///
    /// Returns `None` if it was already taken.
    pub fn candidate_events(&self) -> Option<mpsc::UnboundedReceiver<Candidate>> {
        self.candidate_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Create an offer from local credentials and the requested channel
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateOffer { reply })?;
        rx.await
            .map_err(|_| HearthError::internal("endpoint driver stopped"))?
    }

    /// Create an answer to a previously applied remote offer
    ///
    /// Also triggers gathering when the answering side has not gathered yet.
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateAnswer { reply })?;
        rx.await
            .map_err(|_| HearthError::internal("endpoint driver stopped"))?
    }

    /// Apply the remote description; drains any buffered remote candidates
    pub async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetRemoteDescription { desc, reply })?;
        rx.await
            .map_err(|_| HearthError::internal("endpoint driver stopped"))?
    }

    /// Feed one remote candidate, in whatever order it arrived
    pub fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
        self.send(Command::AddRemoteCandidate(candidate))
    }

    /// Watch the aggregate connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// True once the channel handshake completed on this side
    pub fn channel_open(&self) -> bool {
        *self.channel_rx.borrow()
    }

    /// Local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the driver; idempotent
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| HearthError::internal("endpoint driver stopped"))
    }
}

impl Drop for PeerEndpoint {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

struct RemoteSession {
    ufrag: String,
    pwd: String,
    channel_label: Option<String>,
}

struct Driver {
    socket: Arc<UdpSocket>,
    config: IceConfig,
    stun: StunClient,
    ufrag: String,
    pwd: String,
    channel_label: Option<String>,
    role: Option<DescriptionKind>,
    remote: Option<RemoteSession>,
    pending_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    outstanding: HashMap<[u8; 12], SocketAddr>,
    selected: Option<SocketAddr>,
    gathered: bool,
    state_tx: watch::Sender<ConnectionState>,
    channel_tx: watch::Sender<bool>,
    candidate_tx: mpsc::UnboundedSender<Candidate>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let mut buf = vec![0u8; 1500];
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let socket = Arc::clone(&self.socket);
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_packet(&buf[..len], from).await,
                    Err(e) => debug!(error = %e, "endpoint socket receive failed"),
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }
        self.set_state(ConnectionState::Closed);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::OpenChannel { label } => {
                if self.channel_label.is_none() {
                    self.channel_label = Some(label);
                    self.gather().await;
                }
            }
            Command::CreateOffer { reply } => {
                let result = match &self.channel_label {
                    Some(label) => {
                        self.role = Some(DescriptionKind::Offer);
                        Ok(SessionDescription::offer(&self.ufrag, &self.pwd, label))
                    }
                    None => Err(HearthError::invalid(
                        "open a channel before creating an offer",
                    )),
                };
                let _ = reply.send(result);
            }
            Command::CreateAnswer { reply } => {
                let result = match &self.remote {
                    Some(remote) => {
                        self.role = Some(DescriptionKind::Answer);
                        let label = remote
                            .channel_label
                            .clone()
                            .unwrap_or_else(|| "data".to_string());
                        if self.channel_label.is_none() {
                            self.channel_label = Some(label.clone());
                        }
                        if !self.gathered {
                            self.gather().await;
                        }
                        Ok(SessionDescription::answer(&self.ufrag, &self.pwd, &label))
                    }
                    None => Err(HearthError::invalid(
                        "cannot answer before a remote offer is applied",
                    )),
                };
                let _ = reply.send(result);
            }
            Command::SetRemoteDescription { desc, reply } => {
                self.remote = Some(RemoteSession {
                    ufrag: desc.ufrag().to_string(),
                    pwd: desc.pwd().to_string(),
                    channel_label: desc.channel_label().map(str::to_string),
                });
                // Candidates that raced ahead of the description apply now.
                let buffered = std::mem::take(&mut self.pending_candidates);
                if !buffered.is_empty() {
                    debug!(count = buffered.len(), "applying buffered remote candidates");
                    self.remote_candidates.extend(buffered);
                }
                self.maybe_connecting();
                let _ = reply.send(Ok(()));
            }
            Command::AddRemoteCandidate(candidate) => {
                if self.remote.is_some() {
                    self.remote_candidates.push(candidate);
                } else {
                    self.pending_candidates.push(candidate);
                }
            }
            Command::Close => unreachable!("handled by the run loop"),
        }
    }

    /// Gather host and server-reflexive candidates and publish them
    async fn gather(&mut self) {
        self.set_state(ConnectionState::Gathering);

        let mut seen: HashSet<SocketAddr> = HashSet::new();

        let host_addr = match self.socket.local_addr() {
            Ok(addr) if addr.ip().is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
            }
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "cannot determine local address, endpoint failed");
                self.set_state(ConnectionState::Failed);
                return;
            }
        };
        seen.insert(host_addr);
        self.publish(Candidate::new("host0", host_addr, CandidateKind::Host));

        for (index, server) in self.config.gathering_servers().iter().enumerate() {
            match self.stun.binding(&self.socket, server).await {
                Ok(outcome) => {
                    if seen.insert(outcome.mapped_address) {
                        self.publish(Candidate::new(
                            format!("srflx{index}"),
                            outcome.mapped_address,
                            CandidateKind::ServerReflexive,
                        ));
                    } else {
                        debug!(server = %server, "reflexive mapping duplicates a known candidate");
                    }
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "gathering against server failed");
                }
            }
        }

        self.gathered = true;
        self.maybe_connecting();
    }

    fn publish(&self, candidate: Candidate) {
        debug!(candidate = %candidate, "gathered local candidate");
        let _ = self.candidate_tx.send(candidate);
    }

    fn maybe_connecting(&mut self) {
        if self.gathered && self.remote.is_some() {
            self.set_state(ConnectionState::Connecting);
        }
    }

    async fn on_tick(&mut self) {
        let state = *self.state_tx.borrow();
        match state {
            ConnectionState::Connecting => self.send_checks().await,
            ConnectionState::Connected => self.maybe_open_channel().await,
            _ => {}
        }
    }

    /// One round of connectivity checks against every known remote candidate
    async fn send_checks(&mut self) {
        let Some(remote) = &self.remote else { return };
        if self.outstanding.len() > MAX_OUTSTANDING_CHECKS {
            self.outstanding.clear();
        }

        let username = format!("{}:{}", remote.ufrag, self.ufrag);
        for candidate in &self.remote_candidates {
            let request = StunMessage::binding_request().with_username(&username);
            let transaction_id = request.transaction_id;
            match self.socket.send_to(&request.encode(), candidate.address).await {
                Ok(_) => {
                    self.outstanding.insert(transaction_id, candidate.address);
                }
                Err(e) => {
                    debug!(target_addr = %candidate.address, error = %e, "check send failed");
                }
            }
        }
    }

    /// Offer side drives the channel handshake once a path is confirmed
    async fn maybe_open_channel(&mut self) {
        if self.role != Some(DescriptionKind::Offer) || *self.channel_tx.borrow() {
            return;
        }
        let (Some(label), Some(selected)) = (&self.channel_label, self.selected) else {
            return;
        };
        let datagram = format!("{CHANNEL_PREFIX} open {label}");
        if let Err(e) = self.socket.send_to(datagram.as_bytes(), selected).await {
            debug!(error = %e, "channel open send failed");
        }
    }

    async fn handle_packet(&mut self, packet: &[u8], from: SocketAddr) {
        if StunMessage::is_stun(packet) {
            match StunMessage::decode(packet) {
                Ok(message) => self.handle_stun(message, from).await,
                Err(e) => debug!(error = %e, "discarding malformed STUN packet"),
            }
        } else if let Ok(text) = std::str::from_utf8(packet) {
            self.handle_channel_datagram(text, from).await;
        }
    }

    async fn handle_stun(&mut self, message: StunMessage, from: SocketAddr) {
        if message.is_request() {
            // A peer check. Answer it if it is addressed to our ufrag.
            let expected_prefix = format!("{}:", self.ufrag);
            match message.username() {
                Some(username) if username.starts_with(&expected_prefix) => {
                    let response = StunMessage::binding_response(message.transaction_id, from);
                    if let Err(e) = self.socket.send_to(&response.encode(), from).await {
                        debug!(error = %e, "check response send failed");
                    }
                }
                _ => debug!(peer = %from, "ignoring check with foreign username"),
            }
        } else if message.is_success_response() {
            if self.outstanding.remove(&message.transaction_id).is_some() {
                if self.selected.is_none() {
                    debug!(peer = %from, "connectivity check completed a round trip");
                }
                self.selected = Some(from);
                self.set_state(ConnectionState::Connected);
                self.maybe_open_channel().await;
            }
        }
        // Error responses carry nothing actionable for checks; drop them.
    }

    async fn handle_channel_datagram(&mut self, text: &str, from: SocketAddr) {
        let mut parts = text.split_whitespace();
        if parts.next() != Some(CHANNEL_PREFIX) {
            return;
        }
        match (parts.next(), parts.next()) {
            (Some("open"), Some(label)) => {
                // Remote-initiated channel: acknowledge and mark open here.
                let ack = format!("{CHANNEL_PREFIX} ack {label}");
                if let Err(e) = self.socket.send_to(ack.as_bytes(), from).await {
                    debug!(error = %e, "channel ack send failed");
                }
                let _ = self.channel_tx.send(true);
            }
            (Some("ack"), Some(_label)) => {
                let _ = self.channel_tx.send(true);
            }
            _ => debug!(peer = %from, "ignoring malformed channel datagram"),
        }
    }

    /// Advance the public state; transitions never go backwards
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_starts_in_new_state() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        assert_eq!(endpoint.state(), ConnectionState::New);
        assert!(!endpoint.channel_open());
        endpoint.close();
    }

    #[tokio::test]
    async fn test_open_channel_gathers_host_candidate() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        let mut events = endpoint.candidate_events().unwrap();
        let _handle = endpoint.open_channel("diag").unwrap();

        let candidate = events.recv().await.unwrap();
        assert_eq!(candidate.kind, CandidateKind::Host);
        assert_eq!(candidate.address.port(), endpoint.local_addr().port());
        endpoint.close();
    }

    #[tokio::test]
    async fn test_candidate_events_taken_once() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        assert!(endpoint.candidate_events().is_some());
        assert!(endpoint.candidate_events().is_none());
        endpoint.close();
    }

    #[tokio::test]
    async fn test_offer_requires_channel() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        let err = endpoint.create_offer().await.unwrap_err();
        assert!(matches!(err, HearthError::Invalid { .. }));
        endpoint.close();
    }

    #[tokio::test]
    async fn test_answer_requires_remote_offer() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        let err = endpoint.create_answer().await.unwrap_err();
        assert!(matches!(err, HearthError::Invalid { .. }));
        endpoint.close();
    }

    #[tokio::test]
    async fn test_close_reaches_closed_state() {
        let endpoint = PeerEndpoint::bind(IceConfig::local_only()).await.unwrap();
        let mut state = endpoint.connection_state();
        endpoint.close();
        state
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
        // Idempotent: a second close is a no-op.
        endpoint.close();
    }

    #[test]
    fn test_state_ordering_is_forward_only() {
        assert!(ConnectionState::Gathering > ConnectionState::New);
        assert!(ConnectionState::Connecting > ConnectionState::Gathering);
        assert!(ConnectionState::Connected > ConnectionState::Connecting);
        assert!(ConnectionState::Closed > ConnectionState::Connected);
    }
}
