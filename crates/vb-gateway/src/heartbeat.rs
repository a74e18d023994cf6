//! Ping/pong heartbeat loop for one connection.
//!
//! Grounded on `manager/heartbeat.py`'s `HeartbeatMonitor.heartbeat_loop`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use vb_protocol::{ServerFrame, CLOSE_PING_TIMEOUT};

use crate::manager::ConnectionRegistry;

/// Sends a `ping` every `ping_interval`, and closes the connection with
/// [`CLOSE_PING_TIMEOUT`] if no `pong` has arrived within `pong_timeout`
/// of the most recent ping. Runs until the connection is no longer in
/// `registry`.
pub async fn heartbeat_loop(
    connection_id: Uuid,
    registry: Arc<ConnectionRegistry>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    loop {
        let Some(state) = registry.get(connection_id) else {
            break;
        };

        if !state.send_frame(ServerFrame::Ping).await {
            break;
        }
        state.record_ping();

        tokio::time::sleep(ping_interval).await;

        let Some(state) = registry.get(connection_id) else {
            break;
        };
        if state.is_ping_timed_out(pong_timeout) {
            warn!(connection_id = %connection_id, "connection failed to respond to ping");
            state.close(CLOSE_PING_TIMEOUT, "ping timeout").await;
            registry.disconnect(connection_id).await;
            break;
        }
    }
    debug!(connection_id = %connection_id, "heartbeat loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, Outbound};
    use vb_domain::agent_stream::default_classifier;
    use vb_text::TtsCleaner;

    fn make_state(registry: &ConnectionRegistry) -> (Uuid, tokio::sync::mpsc::Receiver<Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let state = Arc::new(ConnectionState::new(
            Uuid::new_v4(),
            tx,
            Arc::new(TtsCleaner::new(Vec::new())),
            Duration::from_millis(50),
            default_classifier(),
        ));
        let id = state.connection_id;
        registry.connect(state);
        (id, rx)
    }

    #[tokio::test]
    async fn sends_a_ping_and_closes_on_missing_pong() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut rx) = make_state(&registry);

        heartbeat_loop(id, registry.clone(), Duration::from_millis(5), Duration::from_millis(5)).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Outbound::Frame(ServerFrame::Ping)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Outbound::Close { code, .. } if code == CLOSE_PING_TIMEOUT));
        assert!(registry.get(id).is_none());
    }

    #[tokio::test]
    async fn pong_before_timeout_keeps_the_connection_alive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut rx) = make_state(&registry);
        let state = registry.get(id).unwrap();

        let loop_handle = tokio::spawn(heartbeat_loop(
            id,
            registry.clone(),
            Duration::from_millis(20),
            Duration::from_millis(500),
        ));

        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(ServerFrame::Ping)));
        state.record_pong();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(registry.get(id).is_some());
        loop_handle.abort();
    }

    #[tokio::test]
    async fn exits_quietly_once_connection_is_gone() {
        let registry = Arc::new(ConnectionRegistry::new());
        let id = Uuid::new_v4();
        heartbeat_loop(id, registry, Duration::from_millis(5), Duration::from_millis(5)).await;
    }
}
