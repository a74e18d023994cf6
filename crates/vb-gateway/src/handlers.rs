//! Dispatch for each `ClientFrame` variant, plus the task that forwards a
//! turn's outbound frames to the client socket.
//!
//! Grounded on `manager/handlers.py`'s `MessageHandler` and
//! `forward_turn_events`.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use vb_protocol::{ServerFrame, CLOSE_AUTH_FAILED, CODE_INTERRUPTED, CODE_NOTHING_TO_INTERRUPT};

use crate::connection::ConnectionState;
use crate::state::{AppState, ChatRequest};

pub async fn handle_authorize(state: &Arc<AppState>, conn: &Arc<ConnectionState>, token: &str) {
    match state.authenticator.authenticate(token) {
        Some(user_id) => {
            conn.mark_authenticated(user_id);
            conn.send_frame(ServerFrame::AuthorizeSuccess {
                connection_id: conn.connection_id,
            })
            .await;
        }
        None => {
            conn.send_frame(ServerFrame::AuthorizeError {
                error: "invalid authentication token".into(),
            })
            .await;
            warn!(connection_id = %conn.connection_id, "authentication failed");
            conn.close(CLOSE_AUTH_FAILED, "authentication failed").await;
            state.registry.disconnect(conn.connection_id).await;
        }
    }
}

pub async fn handle_pong(conn: &Arc<ConnectionState>) {
    conn.record_pong();
    debug!(connection_id = %conn.connection_id, "received pong");
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_chat_message(
    state: Arc<AppState>,
    conn: Arc<ConnectionState>,
    content: String,
    agent_id: String,
    user_id: String,
    conversation_id: Option<Uuid>,
    metadata: Option<serde_json::Value>,
    images: Option<Vec<String>>,
) {
    if !conn.is_authenticated() {
        conn.send_frame(ServerFrame::error("authentication required"))
            .await;
        return;
    }
    if agent_id.trim().is_empty() {
        conn.send_frame(ServerFrame::error(
            "agent_id is required and must be a non-empty string",
        ))
        .await;
        return;
    }
    if user_id.trim().is_empty() {
        conn.send_frame(ServerFrame::error(
            "user_id is required and must be a non-empty string",
        ))
        .await;
        return;
    }

    let conversation_id = conversation_id.unwrap_or_else(Uuid::new_v4);

    let turn = match conn.processor.start_turn(
        conversation_id,
        content.clone(),
        agent_id.clone(),
        user_id.clone(),
        metadata.clone(),
    ) {
        Ok(turn) => turn,
        Err(err) => {
            conn.send_frame(ServerFrame::error(format!(
                "failed to start turn: {err}"
            )))
            .await;
            return;
        }
    };

    conn.send_frame(ServerFrame::StreamStart {
        turn_id: turn.turn_id.clone(),
        connection_id: conn.connection_id,
        user_id: user_id.clone(),
    })
    .await;

    let request = ChatRequest {
        content,
        agent_id,
        user_id,
        conversation_id,
        metadata,
        images,
    };
    let agent_stream = (state.agent_stream_factory)(&request);

    let turn_id = turn.turn_id.clone();
    let event_rx = match turn.take_event_receiver() {
        Some(rx) => rx,
        None => {
            error!(turn_id = %turn_id, "turn's event receiver was already taken");
            return;
        }
    };

    conn.processor.attach_agent_stream(&turn, agent_stream);

    tokio::spawn(forward_turn_events(
        conn,
        turn_id,
        event_rx,
    ));
}

/// Relays one turn's server frames to its connection, finalizing as soon
/// as a terminal frame (`stream_end` or `error`) is observed, then reports
/// the turn's outcome to the owning `MessageProcessor`.
///
/// This does NOT wait for the event channel to close: `Turn` keeps its own
/// sender alive for the whole turn lifetime, so a channel-close condition
/// would never occur on the happy path. Completion is driven by observing
/// the terminal frame itself (`examples/original_source/.../event_handlers.py`
/// drives completion the same way, from the producer side).
pub async fn forward_turn_events(
    conn: Arc<ConnectionState>,
    turn_id: String,
    mut event_rx: tokio::sync::mpsc::Receiver<ServerFrame>,
) {
    let mut last_error: Option<String> = None;

    while let Some(frame) = event_rx.recv().await {
        let is_terminal = matches!(frame, ServerFrame::StreamEnd { .. } | ServerFrame::Error { .. });
        if let ServerFrame::Error { error, .. } = &frame {
            last_error = Some(error.clone());
        }
        if !conn.send_frame(frame).await {
            warn!(turn_id = %turn_id, "client disconnected mid-stream");
            break;
        }
        if is_terminal {
            break;
        }
    }

    match last_error {
        Some(error) => conn.processor.fail_turn(&turn_id, error).await,
        None => conn.processor.complete_turn(&turn_id).await,
    }
}

pub async fn handle_interrupt(conn: &Arc<ConnectionState>, turn_id: Option<String>) {
    if !conn.is_authenticated() {
        conn.send_frame(ServerFrame::error("authentication required"))
            .await;
        return;
    }

    match turn_id {
        Some(turn_id) => match conn.processor.interrupt_turn(&turn_id).await {
            Ok(true) => {
                conn.send_frame(ServerFrame::error_with_code(
                    format!("turn {turn_id} interrupted"),
                    CODE_INTERRUPTED,
                ))
                .await;
            }
            Ok(false) | Err(_) => {
                conn.send_frame(ServerFrame::error_with_code(
                    format!("active turn {turn_id} not found or already finished"),
                    CODE_NOTHING_TO_INTERRUPT,
                ))
                .await;
            }
        },
        None => {
            let active = conn.processor.get_active_turns();
            if active.is_empty() {
                conn.send_frame(ServerFrame::error_with_code(
                    "no active turns to interrupt",
                    CODE_NOTHING_TO_INTERRUPT,
                ))
                .await;
                return;
            }
            let mut interrupted = 0;
            for turn in active {
                if matches!(conn.processor.interrupt_turn(&turn.turn_id).await, Ok(true)) {
                    interrupted += 1;
                }
            }
            conn.send_frame(ServerFrame::error_with_code(
                format!("interrupted {interrupted} active turns"),
                CODE_INTERRUPTED,
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DefaultAuthenticator;
    use crate::connection::Outbound;
    use std::pin::Pin;
    use vb_domain::agent_stream::AgentEvent;
    use vb_domain::config::GatewayConfig;
    use vb_text::TtsCleaner;

    fn make_conn() -> (Arc<ConnectionState>, tokio::sync::mpsc::Receiver<Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let conn = Arc::new(ConnectionState::new(
            Uuid::new_v4(),
            tx,
            Arc::new(TtsCleaner::new(Vec::new())),
            std::time::Duration::from_millis(50),
            vb_domain::agent_stream::default_classifier(),
        ));
        (conn, rx)
    }

    fn make_state() -> Arc<AppState> {
        let factory: crate::state::AgentStreamFactory = Arc::new(|_req: &ChatRequest| {
            Box::pin(futures_util::stream::iter(vec![
                AgentEvent::StreamToken {
                    chunk: "Hi.".into(),
                },
                AgentEvent::StreamEnd,
            ])) as Pin<Box<_>>
        });
        Arc::new(AppState::new(
            GatewayConfig::default(),
            Arc::new(DefaultAuthenticator),
            factory,
        ))
    }

    #[tokio::test]
    async fn authorize_with_empty_token_closes_connection() {
        let state = make_state();
        let (conn, mut rx) = make_conn();
        state.registry.connect(conn.clone());

        handle_authorize(&state, &conn, "").await;

        assert!(!conn.is_authenticated());
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Outbound::Frame(ServerFrame::AuthorizeError { .. })));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Outbound::Close { code, .. } if code == CLOSE_AUTH_FAILED));
    }

    #[tokio::test]
    async fn authorize_with_token_marks_authenticated() {
        let state = make_state();
        let (conn, mut rx) = make_conn();

        handle_authorize(&state, &conn, "a-real-token").await;

        assert!(conn.is_authenticated());
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, Outbound::Frame(ServerFrame::AuthorizeSuccess { .. })));
    }

    #[tokio::test]
    async fn chat_message_before_authorize_is_rejected() {
        let state = make_state();
        let (conn, mut rx) = make_conn();

        handle_chat_message(
            state,
            conn,
            "hi".into(),
            "agent-1".into(),
            "user-1".into(),
            None,
            None,
            None,
        )
        .await;

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, Outbound::Frame(ServerFrame::Error { .. })));
    }

    #[tokio::test]
    async fn forward_turn_events_finalizes_on_stream_end_without_waiting_for_channel_close() {
        let (conn, mut rx) = make_conn();
        conn.mark_authenticated("user-1".into());
        let turn = conn
            .processor
            .start_turn(Uuid::new_v4(), "hi".into(), "a".into(), "u".into(), None)
            .unwrap();
        let turn_id = turn.turn_id.clone();
        let event_rx = turn.take_event_receiver().unwrap();
        let event_tx = turn.event_sender();

        event_tx
            .send(ServerFrame::StreamEnd {
                turn_id: turn_id.clone(),
                reason: None,
                status: Some("processing".into()),
            })
            .await
            .unwrap();

        // forward_turn_events must return even though `event_tx` (held by
        // `turn`) is still alive and the channel never closes.
        tokio::time::timeout(
            std::time::Duration::from_millis(500),
            forward_turn_events(conn.clone(), turn_id.clone(), event_rx),
        )
        .await
        .expect("forward_turn_events must not hang waiting for channel close");

        assert!(conn.processor.get_turn(&turn_id).is_none());
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, Outbound::Frame(ServerFrame::StreamEnd { .. })));
    }

    #[tokio::test]
    async fn interrupting_with_no_active_turn_reports_nothing_to_interrupt() {
        let (conn, mut rx) = make_conn();
        conn.mark_authenticated("user-1".into());

        handle_interrupt(&conn, None).await;

        let frame = rx.recv().await.unwrap();
        match frame {
            Outbound::Frame(ServerFrame::Error { code, .. }) => {
                assert_eq!(code, Some(CODE_NOTHING_TO_INTERRUPT));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
