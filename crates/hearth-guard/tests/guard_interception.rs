//! Guard behavior against a fake underlying factory
//!
//! The inner factory records every URL it is asked to dial, so the tests can
//! verify exactly which attempts the guard let through.

use async_trait::async_trait;
use hearth_core::Result;
use hearth_guard::{
    BlockedPatterns, GuardedFactory, InterceptedConnectionState, SignalingSocket, SocketEvent,
    SocketFactory, SYNTHETIC_CLOSE_CODE,
};
use std::sync::{Arc, Mutex};

/// Records dialed URLs; hands out sockets that open and immediately close.
#[derive(Default)]
struct RecordingFactory {
    dialed: Mutex<Vec<String>>,
}

impl RecordingFactory {
    fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocketFactory for RecordingFactory {
    async fn connect(&self, url: &str) -> Result<SignalingSocket> {
        self.dialed.lock().unwrap().push(url.to_string());
        // Any socket will do; the tests only care that delegation happened.
        Ok(SignalingSocket::synthetic_blocked(url, "fake"))
    }
}

fn guard_over(patterns: Vec<&str>) -> (GuardedFactory, Arc<RecordingFactory>) {
    let inner = Arc::new(RecordingFactory::default());
    let guard = GuardedFactory::new(
        inner.clone(),
        BlockedPatterns::new(patterns.into_iter().map(String::from).collect()),
    );
    (guard, inner)
}

#[tokio::test]
async fn test_blocked_url_gets_synthetic_error_then_close() {
    let (guard, inner) = guard_over(vec!["evil.test"]);

    let mut socket = guard.connect("wss://evil.test:3000/ws").await.unwrap();
    assert!(inner.dialed().is_empty(), "blocked URL must never be dialed");

    let first = socket.next_event().await.unwrap();
    match first {
        SocketEvent::Error { message } => {
            assert!(message.contains("evil.test"));
        }
        other => panic!("expected an error event first, got {other:?}"),
    }

    let second = socket.next_event().await.unwrap();
    assert!(matches!(
        second,
        SocketEvent::Closed {
            code: SYNTHETIC_CLOSE_CODE,
            ..
        }
    ));
    assert_eq!(socket.state(), InterceptedConnectionState::Closed);

    // Exactly one error and one close: the stream ends here.
    assert!(socket.next_event().await.is_none());
}

#[tokio::test]
async fn test_unblocked_url_delegates_to_inner_factory() {
    let (guard, inner) = guard_over(vec!["evil.test"]);

    let _socket = guard.connect("wss://good.test/ws").await.unwrap();
    assert_eq!(inner.dialed(), vec!["wss://good.test/ws".to_string()]);
    assert_eq!(guard.blocked_attempts(), 0);
}

#[tokio::test]
async fn test_counter_matches_blocked_attempts_exactly() {
    let (guard, inner) = guard_over(vec!["evil.test"]);

    for i in 0..7 {
        let _ = guard.connect(&format!("wss://evil.test/ws?try={i}")).await;
    }
    assert_eq!(guard.blocked_attempts(), 7);
    assert!(inner.dialed().is_empty());
}

#[tokio::test]
async fn test_overlapping_patterns_count_once_per_attempt() {
    // Both patterns match the URL; the attempt still counts once.
    let (guard, _inner) = guard_over(vec!["chat.evil.test", "evil.test"]);

    let _ = guard.connect("wss://chat.evil.test/ws").await;
    assert_eq!(guard.blocked_attempts(), 1);
}

#[tokio::test]
async fn test_send_on_synthetic_socket_has_no_effect() {
    let (guard, inner) = guard_over(vec!["evil.test"]);

    let mut socket = guard.connect("wss://evil.test/ws").await.unwrap();
    socket.send("offer payload");

    // Still exactly the two lifecycle events, and nothing was dialed.
    assert!(matches!(
        socket.next_event().await,
        Some(SocketEvent::Error { .. })
    ));
    assert!(matches!(
        socket.next_event().await,
        Some(SocketEvent::Closed { .. })
    ));
    socket.close();
    assert!(socket.next_event().await.is_none());
    assert!(inner.dialed().is_empty());
}
