//! Per-connection state: identity, heartbeat bookkeeping, the outbound
//! frame channel, and the owned [`MessageProcessor`].
//!
//! Grounded on `manager/connection.py`'s `ConnectionState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use vb_protocol::ServerFrame;
use vb_text::TtsCleaner;

use crate::runtime::MessageProcessor;

/// Everything sent to a connection's writer task: either a frame to
/// serialize onto the socket, or a request to close it. Splitting close
/// out of `ServerFrame` lets the heartbeat monitor and the handshake
/// failure path trigger a real WebSocket close frame without the writer
/// task having to special-case any particular `ServerFrame` variant.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Close { code: u16, reason: String },
}

pub struct ConnectionState {
    pub connection_id: Uuid,
    pub created_at: DateTime<Utc>,
    is_authenticated: AtomicBool,
    user_id: Mutex<Option<String>>,
    last_ping_time: Mutex<Option<DateTime<Utc>>>,
    last_pong_time: Mutex<Option<DateTime<Utc>>>,
    outbound: mpsc::Sender<Outbound>,
    pub processor: MessageProcessor,
}

impl ConnectionState {
    pub fn new(
        connection_id: Uuid,
        outbound: mpsc::Sender<Outbound>,
        tts: Arc<TtsCleaner>,
        interrupt_wait_timeout: Duration,
        classifier: vb_domain::agent_stream::ToolResultClassifier,
    ) -> Self {
        Self {
            connection_id,
            created_at: Utc::now(),
            is_authenticated: AtomicBool::new(false),
            user_id: Mutex::new(None),
            last_ping_time: Mutex::new(None),
            last_pong_time: Mutex::new(None),
            outbound,
            processor: MessageProcessor::new(tts, interrupt_wait_timeout, classifier),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated.load(Ordering::Acquire)
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().clone()
    }

    pub fn mark_authenticated(&self, user_id: String) {
        *self.user_id.lock() = Some(user_id);
        self.is_authenticated.store(true, Ordering::Release);
    }

    pub fn record_ping(&self) {
        *self.last_ping_time.lock() = Some(Utc::now());
    }

    pub fn record_pong(&self) {
        *self.last_pong_time.lock() = Some(Utc::now());
    }

    /// True if a ping was sent, no pong has arrived since, and more than
    /// `pong_timeout` has elapsed since that ping (SPEC_FULL.md §4.F).
    pub fn is_ping_timed_out(&self, pong_timeout: Duration) -> bool {
        let last_ping = self.last_ping_time.lock();
        let last_pong = self.last_pong_time.lock();
        match (*last_ping, *last_pong) {
            (Some(ping), Some(pong)) if pong < ping => {
                Utc::now().signed_duration_since(ping).to_std().unwrap_or_default() > pong_timeout
            }
            (Some(_), Some(_)) => false,
            (Some(ping), None) => Utc::now().signed_duration_since(ping).to_std().unwrap_or_default() > pong_timeout,
            (None, _) => false,
        }
    }

    pub fn outbound(&self) -> mpsc::Sender<Outbound> {
        self.outbound.clone()
    }

    pub async fn send_frame(&self, frame: ServerFrame) -> bool {
        self.outbound.send(Outbound::Frame(frame)).await.is_ok()
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self
            .outbound
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (ConnectionState, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let state = ConnectionState::new(
            Uuid::new_v4(),
            tx,
            Arc::new(TtsCleaner::new(Vec::new())),
            Duration::from_millis(50),
            vb_domain::agent_stream::default_classifier(),
        );
        (state, rx)
    }

    #[test]
    fn starts_unauthenticated() {
        let (state, _rx) = state();
        assert!(!state.is_authenticated());
        assert!(state.user_id().is_none());
    }

    #[test]
    fn marking_authenticated_records_user_id() {
        let (state, _rx) = state();
        state.mark_authenticated("user-1".into());
        assert!(state.is_authenticated());
        assert_eq!(state.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn no_ping_sent_is_never_a_timeout() {
        let (state, _rx) = state();
        assert!(!state.is_ping_timed_out(Duration::from_millis(1)));
    }

    #[test]
    fn ping_without_pong_times_out_after_the_window() {
        let (state, _rx) = state();
        *state.last_ping_time.lock() = Some(Utc::now() - chrono::Duration::seconds(5));
        assert!(state.is_ping_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn recent_pong_clears_the_timeout() {
        let (state, _rx) = state();
        state.record_ping();
        state.record_pong();
        assert!(!state.is_ping_timed_out(Duration::from_millis(1)));
    }

    #[test]
    fn stale_pong_from_before_the_last_ping_times_out_after_the_window() {
        let (state, _rx) = state();
        *state.last_pong_time.lock() = Some(Utc::now() - chrono::Duration::seconds(10));
        *state.last_ping_time.lock() = Some(Utc::now() - chrono::Duration::seconds(5));
        assert!(state.is_ping_timed_out(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn send_frame_delivers_to_outbound_channel() {
        let (state, mut rx) = state();
        assert!(state.send_frame(ServerFrame::Ping).await);
        match rx.recv().await.unwrap() {
            Outbound::Frame(ServerFrame::Ping) => {}
            _ => panic!("expected a Ping frame"),
        }
    }
}
