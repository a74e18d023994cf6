//! Connection registry: tracks every live `ConnectionState` and routes
//! outbound frames and broadcasts to them.
//!
//! Grounded on `manager/websocket_manager.py`'s `WebSocketManager`
//! (its `connections` dict, `send_message`, `broadcast_message`,
//! `disconnect`), adapted to an `Arc<ConnectionState>` registry since each
//! connection's actual socket write loop lives in its own task
//! (`ws.rs`) rather than behind a central `send_text` call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use vb_protocol::ServerFrame;

use crate::connection::ConnectionState;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Arc<ConnectionState>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, state: Arc<ConnectionState>) {
        let id = state.connection_id;
        self.connections.write().insert(id, state);
        info!(connection_id = %id, "connection registered");
    }

    /// Removes and returns the connection's state, shutting down its
    /// message processor. Safe to call more than once.
    pub async fn disconnect(&self, connection_id: Uuid) -> Option<Arc<ConnectionState>> {
        let removed = self.connections.write().remove(&connection_id);
        if let Some(state) = &removed {
            state.processor.shutdown().await;
            info!(connection_id = %connection_id, "connection removed");
        }
        removed
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionState>> {
        self.connections.read().get(&connection_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends `frame` to one connection. Returns `false` if the connection
    /// is unknown or its outbound channel has already closed.
    pub async fn send(&self, connection_id: Uuid, frame: ServerFrame) -> bool {
        let Some(state) = self.get(connection_id) else {
            warn!(connection_id = %connection_id, "attempted to send to unknown connection");
            return false;
        };
        state.send_frame(frame).await
    }

    /// Sends `frame` to every connection, optionally restricted to
    /// authenticated ones.
    pub async fn broadcast(&self, frame: ServerFrame, authenticated_only: bool) {
        let targets: Vec<Arc<ConnectionState>> = self
            .connections
            .read()
            .values()
            .filter(|c| !authenticated_only || c.is_authenticated())
            .cloned()
            .collect();
        for state in targets {
            state.send_frame(frame.clone()).await;
        }
    }

    /// Sweeps every connection's `MessageProcessor` for terminal turns
    /// older than `max_age_seconds` (SPEC_FULL.md §3, §4.E). Returns the
    /// total number evicted across all connections.
    pub async fn sweep_stale_turns(&self, max_age_seconds: i64) -> usize {
        let connections: Vec<Arc<ConnectionState>> = self.connections.read().values().cloned().collect();
        let mut total = 0;
        for conn in connections {
            total += conn.processor.cleanup_completed_turns(max_age_seconds).await;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vb_domain::agent_stream::default_classifier;
    use vb_text::TtsCleaner;

    fn make_state() -> (Arc<ConnectionState>, tokio::sync::mpsc::Receiver<crate::connection::Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let state = Arc::new(ConnectionState::new(
            Uuid::new_v4(),
            tx,
            Arc::new(TtsCleaner::new(Vec::new())),
            Duration::from_millis(50),
            default_classifier(),
        ));
        (state, rx)
    }

    #[tokio::test]
    async fn connect_then_disconnect_removes_it() {
        let registry = ConnectionRegistry::new();
        let (state, _rx) = make_state();
        let id = state.connection_id;
        registry.connect(state);
        assert!(registry.get(id).is_some());

        registry.disconnect(id).await;
        assert!(registry.get(id).is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_connection_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(Uuid::new_v4(), ServerFrame::Ping).await);
    }

    #[tokio::test]
    async fn broadcast_only_reaches_authenticated_connections_by_default() {
        let registry = ConnectionRegistry::new();
        let (unauth, mut unauth_rx) = make_state();
        let (auth, mut auth_rx) = make_state();
        auth.mark_authenticated("user-1".into());

        registry.connect(unauth);
        registry.connect(auth);

        registry.broadcast(ServerFrame::Ping, true).await;

        assert!(auth_rx.try_recv().is_ok());
        assert!(unauth_rx.try_recv().is_err());
    }
}
