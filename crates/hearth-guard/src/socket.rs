//! Signaling socket object and the synthetic blocked variant
//!
//! `SignalingSocket` is the one connection type callers see, whether the
//! factory dialed a real WebSocket or substituted a synthetic refusal. Events
//! arrive on an owned receiver; `send` and `close` are fire-and-forget, with
//! transport problems surfacing as [`SocketEvent::Error`] rather than return
//! values. A synthetic socket never opens: it emits exactly one error event,
//! then one close event, and ends in `Closed`.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Close code used when a synthetic socket shuts down
pub const SYNTHETIC_CLOSE_CODE: u16 = 1000;

const SYNTHETIC_FAILURE_DELAY: Duration = Duration::from_millis(50);

/// Connection lifecycle, single forward path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterceptedConnectionState {
    /// Construction accepted, not yet settled
    Connecting,
    /// Handshake completed; real sockets only
    Open,
    /// Terminal; never re-entered
    Closed,
}

/// Something the socket has to tell its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived
    Message(String),
    /// The transport failed
    Error {
        /// Human-readable cause
        message: String,
    },
    /// The connection ended
    Closed {
        /// Close code
        code: u16,
        /// Close reason text
        reason: String,
    },
}

pub(crate) enum SocketCommand {
    Send(String),
    Close,
}

/// A signaling connection handed out by a socket factory
pub struct SignalingSocket {
    url: String,
    state_rx: watch::Receiver<InterceptedConnectionState>,
    event_rx: mpsc::UnboundedReceiver<SocketEvent>,
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
}

impl SignalingSocket {
    pub(crate) fn new(
        url: String,
        state_rx: watch::Receiver<InterceptedConnectionState>,
        event_rx: mpsc::UnboundedReceiver<SocketEvent>,
        cmd_tx: mpsc::UnboundedSender<SocketCommand>,
    ) -> Self {
        Self {
            url,
            state_rx,
            event_rx,
            cmd_tx,
        }
    }

    /// Build a socket whose driver is a blocked-endpoint refusal
    ///
    /// The driver waits a short fixed delay, emits one error event naming the
    /// matched pattern, moves to `Closed`, emits one close event, and exits.
    /// Outbound sends are discarded.
    pub fn synthetic_blocked(url: &str, pattern: &str) -> Self {
        let (state_tx, state_rx) = watch::channel(InterceptedConnectionState::Connecting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SocketCommand>();

        let error_message = format!(
            "connection to blocked signaling endpoint {url} refused (matched \"{pattern}\")"
        );
        tokio::spawn(async move {
            tokio::time::sleep(SYNTHETIC_FAILURE_DELAY).await;
            let _ = event_tx.send(SocketEvent::Error {
                message: error_message,
            });
            advance(&state_tx, InterceptedConnectionState::Closed);
            let _ = event_tx.send(SocketEvent::Closed {
                code: SYNTHETIC_CLOSE_CODE,
                reason: "blocked signaling endpoint".to_string(),
            });
            // Commands queued while connecting die with the receiver here;
            // sends and closes after this point are quiet no-ops.
            drop(cmd_rx);
        });

        Self::new(url.to_string(), state_rx, event_rx, cmd_tx)
    }

    /// The URL this socket was constructed for
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle state
    pub fn state(&self) -> InterceptedConnectionState {
        *self.state_rx.borrow()
    }

    /// Next event from the driver; `None` once the driver is done and the
    /// queue is drained
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.event_rx.recv().await
    }

    /// Queue a text frame; silently discarded once the connection is gone
    pub fn send(&self, text: impl Into<String>) {
        if self
            .cmd_tx
            .send(SocketCommand::Send(text.into()))
            .is_err()
        {
            debug!(url = %self.url, "discarding send on finished socket");
        }
    }

    /// Ask the driver to close; idempotent
    pub fn close(&self) {
        let _ = self.cmd_tx.send(SocketCommand::Close);
    }
}

/// Advance a state watch; transitions never go backwards
pub(crate) fn advance(
    state_tx: &watch::Sender<InterceptedConnectionState>,
    next: InterceptedConnectionState,
) {
    state_tx.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}
