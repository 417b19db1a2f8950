//! Socket construction seam and the guarded factory
//!
//! Applications dial signaling endpoints through [`SocketFactory`] instead
//! of calling the WebSocket library directly. [`WebSocketFactory`] is the
//! real transport; [`GuardedFactory`] wraps any factory with the blocklist
//! and substitutes a synthetic refusal for blocked URLs. Install the guard
//! process-wide once at startup and every caller that goes through
//! [`signaling_factory`] is covered.

use crate::patterns::BlockedPatterns;
use crate::socket::{advance, InterceptedConnectionState, SignalingSocket, SocketCommand, SocketEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hearth_core::{HearthError, Result};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, warn};
use url::Url;

/// Attempts after which the guard warns about a likely reconnect loop
const RECONNECT_LOOP_THRESHOLD: u64 = 20;

static INSTALLED_FACTORY: OnceCell<Arc<dyn SocketFactory>> = OnceCell::new();

/// Construction seam for signaling connections
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<SignalingSocket>;
}

/// Real WebSocket transport
#[derive(Debug, Default)]
pub struct WebSocketFactory;

#[async_trait]
impl SocketFactory for WebSocketFactory {
    async fn connect(&self, url: &str) -> Result<SignalingSocket> {
        let parsed = Url::parse(url)
            .map_err(|e| HearthError::invalid(format!("invalid signaling url {url}: {e}")))?;
        let (ws_stream, _response) = connect_async(parsed.as_str())
            .await
            .map_err(|e| HearthError::network(format!("WebSocket connect failed: {e}")))?;

        let (state_tx, state_rx) = watch::channel(InterceptedConnectionState::Connecting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<SocketCommand>();
        advance(&state_tx, InterceptedConnectionState::Open);

        let (mut sink, mut stream) = ws_stream.split();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(SocketCommand::Send(text)) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = event_tx.send(SocketEvent::Error {
                                    message: format!("send failed: {e}"),
                                });
                            }
                        }
                        None | Some(SocketCommand::Close) => {
                            let _ = sink.send(Message::Close(None)).await;
                            advance(&state_tx, InterceptedConnectionState::Closed);
                            let _ = event_tx.send(SocketEvent::Closed {
                                code: 1000,
                                reason: "closed by local peer".to_string(),
                            });
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = event_tx.send(SocketEvent::Message(text));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            advance(&state_tx, InterceptedConnectionState::Closed);
                            let (code, reason) = match frame {
                                Some(f) => (u16::from(f.code), f.reason.to_string()),
                                None => (1005, String::new()),
                            };
                            let _ = event_tx.send(SocketEvent::Closed { code, reason });
                            break;
                        }
                        Some(Ok(_)) => {} // binary/ping/pong handled by tungstenite
                        Some(Err(e)) => {
                            let _ = event_tx.send(SocketEvent::Error {
                                message: format!("transport error: {e}"),
                            });
                            advance(&state_tx, InterceptedConnectionState::Closed);
                            let _ = event_tx.send(SocketEvent::Closed {
                                code: 1006,
                                reason: "transport error".to_string(),
                            });
                            break;
                        }
                        None => {
                            advance(&state_tx, InterceptedConnectionState::Closed);
                            let _ = event_tx.send(SocketEvent::Closed {
                                code: 1006,
                                reason: "connection lost".to_string(),
                            });
                            break;
                        }
                    },
                }
            }
        });

        Ok(SignalingSocket::new(
            url.to_string(),
            state_rx,
            event_rx,
            cmd_tx,
        ))
    }
}

/// Blocklist wrapper around another factory
///
/// Owns its blocked-attempt counter; no module-level mutable state. Blocked
/// attempts are logged individually for the first few, then sampled, so a
/// retry storm cannot flood the log.
pub struct GuardedFactory {
    inner: Arc<dyn SocketFactory>,
    patterns: BlockedPatterns,
    blocked: AtomicU64,
    loop_warned: AtomicBool,
}

impl GuardedFactory {
    /// Wrap `inner` with `patterns`
    pub fn new(inner: Arc<dyn SocketFactory>, patterns: BlockedPatterns) -> Self {
        Self {
            inner,
            patterns,
            blocked: AtomicU64::new(0),
            loop_warned: AtomicBool::new(false),
        }
    }

    /// Total blocked construction attempts over this guard's lifetime
    pub fn blocked_attempts(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    /// One increment per blocked attempt, with throttled logging
    fn record_blocked(&self, url: &str, pattern: &str) {
        let count = self.blocked.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 5 || count % 10 == 0 {
            warn!(url = %url, pattern = %pattern, count, "blocked signaling connection attempt");
        }
        if count > RECONNECT_LOOP_THRESHOLD && !self.loop_warned.swap(true, Ordering::Relaxed) {
            warn!(
                count,
                "signaling endpoint blocked repeatedly; a caller is likely stuck in a reconnect loop"
            );
        }
    }
}

#[async_trait]
impl SocketFactory for GuardedFactory {
    async fn connect(&self, url: &str) -> Result<SignalingSocket> {
        match self.patterns.matched_pattern(url) {
            Some(pattern) => {
                self.record_blocked(url, pattern);
                Ok(SignalingSocket::synthetic_blocked(url, pattern))
            }
            None => {
                debug!(url = %url, "delegating connection to the underlying factory");
                self.inner.connect(url).await
            }
        }
    }
}

/// Install the process-wide guarded factory
///
/// Wraps the real WebSocket transport with `patterns`. Installation happens
/// at most once; a repeat call logs and leaves the installed factory
/// untouched, and failure never stops the host application.
pub fn install_connection_guard(patterns: BlockedPatterns) {
    let guarded = Arc::new(GuardedFactory::new(Arc::new(WebSocketFactory), patterns));
    if INSTALLED_FACTORY.set(guarded).is_err() {
        error!("connection guard already installed; keeping the existing factory");
    }
}

/// The process-wide signaling factory
///
/// Falls back to a guard over the default blocklist when nothing was
/// installed explicitly.
pub fn signaling_factory() -> Arc<dyn SocketFactory> {
    INSTALLED_FACTORY
        .get_or_init(|| {
            Arc::new(GuardedFactory::new(
                Arc::new(WebSocketFactory),
                BlockedPatterns::default(),
            ))
        })
        .clone()
}
