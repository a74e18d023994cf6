//! Axum WebSocket upgrade endpoint and the per-connection read/write loop.
//!
//! Grounded on `api/routes/websocket.py`'s `websocket_endpoint` and the
//! teacher's `nodes/ws.rs` registry/writer-task split.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vb_protocol::{ClientFrame, ServerFrame};

use crate::connection::{ConnectionState, Outbound};
use crate::handlers;
use crate::state::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<Outbound>(state.config.queue_size);
    let conn = Arc::new(ConnectionState::new(
        connection_id,
        outbound_tx,
        state.tts.clone(),
        state.config.interrupt_wait_timeout(),
        state.tool_result_classifier.clone(),
    ));
    state.registry.connect(conn.clone());
    info!(connection_id = %connection_id, "websocket connection established");

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => match frame.to_json() {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to serialize outbound frame"),
                },
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let heartbeat = tokio::spawn(crate::heartbeat::heartbeat_loop(
        connection_id,
        state.registry.clone(),
        state.config.ping_interval(),
        state.config.pong_timeout(),
    ));

    let mut consecutive_errors = 0u32;
    loop {
        let next = tokio::time::timeout(state.config.inactivity_timeout(), stream.next());
        let message = match next.await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                warn!(connection_id = %connection_id, error = %err, "websocket read error");
                consecutive_errors += 1;
                if consecutive_errors >= state.config.max_frame_errors {
                    break;
                }
                tokio::time::sleep(state.config.error_backoff()).await;
                continue;
            }
            Ok(None) => break,
            Err(_) => {
                debug!(connection_id = %connection_id, "connection idle past inactivity timeout");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                consecutive_errors = 0;
                dispatch(&state, &conn, &text).await;
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    heartbeat.abort();
    writer.abort();
    state.registry.disconnect(connection_id).await;
    info!(connection_id = %connection_id, "websocket connection closed");
}

async fn dispatch(state: &Arc<AppState>, conn: &Arc<ConnectionState>, raw: &str) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(connection_id = %conn.connection_id, error = %err, "could not parse client frame");
            conn.send_frame(ServerFrame::error("invalid message format"))
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Authorize { token } => handlers::handle_authorize(state, conn, &token).await,
        ClientFrame::Pong => handlers::handle_pong(conn).await,
        ClientFrame::ChatMessage {
            content,
            agent_id,
            user_id,
            conversation_id,
            metadata,
            images,
        } => {
            handlers::handle_chat_message(
                state.clone(),
                conn.clone(),
                content,
                agent_id,
                user_id,
                conversation_id,
                metadata,
                images,
            )
            .await
        }
        ClientFrame::InterruptStream { turn_id } => handlers::handle_interrupt(conn, turn_id).await,
    }
}
