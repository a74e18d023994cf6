//! Turns one turn's `AgentStream` into TTS-ready frames on its event queue.
//!
//! Two tasks cooperate per turn (SPEC_FULL.md §4.C):
//!
//! - [`produce_agent_events`] drains the injected `AgentStream`, appending
//!   token text to the turn's transcript and forwarding raw tokens into the
//!   turn's token channel; it logs tool calls/results and reacts to
//!   `stream_end`/`error`.
//! - [`consume_token_events`] drains that token channel through the
//!   sentence chunker and TTS cleaner, emitting `ServerFrame::TtsReadyChunk`
//!   for every non-empty sentence, and a final `ServerFrame::StreamEnd` once
//!   the channel closes — unless the turn was cancelled, in which case
//!   `MessageProcessor::interrupt_turn` sends the one synthetic terminal
//!   frame itself.
//!
//! Grounded on `message_processor/event_handlers.py`'s `EventHandler`.
//! Python signals end-of-stream by pushing a `TOKEN_QUEUE_SENTINEL` marker
//! object onto the token queue; here the producer simply drops its
//! `mpsc::Sender`, and the consumer's `recv()` returning `None` is the
//! end-of-stream signal.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{info, warn};

use vb_domain::agent_stream::{AgentEvent, AgentStream, ToolResultClassifier};
use vb_domain::turn::TurnStatus;
use vb_protocol::ServerFrame;

use super::turn::Turn;

/// Drains `stream`, updating `turn` and forwarding raw token text into the
/// turn's token channel. Returns once the stream ends, errors, or the turn
/// is cancelled.
pub async fn produce_agent_events(
    turn: Arc<Turn>,
    mut stream: AgentStream,
    classifier: ToolResultClassifier,
) {
    while let Some(event) = stream.next().await {
        if turn.cancel.is_cancelled() {
            break;
        }
        match event {
            AgentEvent::StreamStart => {
                info!(turn_id = %turn.turn_id, "agent stream started");
            }
            AgentEvent::StreamToken { chunk } => {
                turn.append_response(&chunk);
                if let Some(tx) = turn.token_sender() {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
            AgentEvent::ToolCall { tool_name, args } => {
                log_tool_call(&turn, &tool_name, &args);
            }
            AgentEvent::ToolResult { result, node } => {
                log_tool_result(&turn, &result, node.as_deref(), &classifier);
            }
            AgentEvent::StreamEnd => {
                break;
            }
            AgentEvent::Error { error } => {
                warn!(turn_id = %turn.turn_id, error = %error, "agent stream reported an error");
                let _ = turn
                    .event_sender()
                    .send(ServerFrame::error(error))
                    .await;
                break;
            }
        }
    }
    turn.close_token_stream();
}

fn log_tool_call(turn: &Turn, tool_name: &str, args: &str) {
    turn.record_tool_call_start(tool_name);
    info!(
        session_id = %turn.conversation_id,
        turn_id = %turn.turn_id,
        tool_name,
        args = %super::truncate_str(args, 200),
        status = "started",
        "tool call"
    );
}

fn log_tool_result(turn: &Turn, result: &str, node: Option<&str>, classifier: &ToolResultClassifier) {
    let is_error = classifier(result);
    let status = if is_error { "error" } else { "success" };
    let preview = super::truncate_str(result, 200);
    let (tool_name, duration_ms) = match turn.take_last_tool_call() {
        Some((name, elapsed)) => (name, elapsed.as_millis() as u64),
        None => ("unknown".to_string(), 0),
    };

    if is_error {
        warn!(
            session_id = %turn.conversation_id,
            turn_id = %turn.turn_id,
            tool_name = %tool_name,
            duration_ms,
            status,
            node,
            result = %preview,
            "tool result reported failure"
        );
    } else {
        info!(
            session_id = %turn.conversation_id,
            turn_id = %turn.turn_id,
            tool_name = %tool_name,
            duration_ms,
            status,
            node,
            result = %preview,
            "tool result"
        );
    }
}

/// Drains `token_rx` through `turn`'s chunker and cleaner, emitting
/// `TtsReadyChunk` frames, then a final `StreamEnd` once the channel
/// closes (or the turn is cancelled).
pub async fn consume_token_events(turn: Arc<Turn>, mut token_rx: tokio::sync::mpsc::Receiver<String>) {
    let event_tx = turn.event_sender();

    loop {
        if turn.cancel.is_cancelled() {
            break;
        }
        match token_rx.recv().await {
            Some(token) => {
                let sentences = turn.chunker().lock().process(&token);
                for sentence in sentences {
                    emit_sentence(&turn, &event_tx, sentence).await;
                }
            }
            None => {
                let rest = turn.chunker().lock().flush();
                if let Some(rest) = rest {
                    emit_sentence(&turn, &event_tx, rest).await;
                }
                break;
            }
        }
    }

    // A cancelled turn's terminal frame is the synthetic `stream_end`
    // `MessageProcessor::interrupt_turn` sends itself (SPEC_FULL.md §4.E);
    // sending another one here would violate "exactly one stream_end". This
    // frame always reports `completed`, not `turn.status()`: the turn's
    // status only actually transitions to `Completed` afterward, inside
    // `MessageProcessor::complete_turn`, once this frame has already been
    // forwarded to the client.
    if !turn.cancel.is_cancelled() {
        let _ = event_tx
            .send(ServerFrame::StreamEnd {
                turn_id: turn.turn_id.clone(),
                reason: None,
                status: Some(TurnStatus::Completed.to_string()),
            })
            .await;
    }
}

async fn emit_sentence(turn: &Turn, event_tx: &tokio::sync::mpsc::Sender<ServerFrame>, sentence: String) {
    let processed = turn.tts().process(&sentence);
    if !vb_text::cleaner::TtsCleaner::has_speakable_content(&processed.text) {
        return;
    }
    let _ = event_tx
        .send(ServerFrame::TtsReadyChunk {
            turn_id: turn.turn_id.clone(),
            chunk: processed.text,
            emotion: processed.emotion,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use uuid::Uuid;
    use vb_domain::agent_stream::default_classifier;
    use vb_text::TtsCleaner;

    fn make_turn() -> Arc<Turn> {
        Arc::new(Turn::new(
            "t1".into(),
            Uuid::new_v4(),
            "hi".into(),
            "agent-1".into(),
            "user-1".into(),
            None,
            Arc::new(TtsCleaner::new(Vec::new())),
        ))
    }

    fn stream_of(events: Vec<AgentEvent>) -> AgentStream {
        Box::pin(futures_util::stream::iter(events)) as Pin<Box<_>>
    }

    #[tokio::test]
    async fn produces_tokens_and_closes_stream_on_stream_end() {
        let turn = make_turn();
        let token_rx = turn.open_token_stream();

        let events = vec![
            AgentEvent::StreamStart,
            AgentEvent::StreamToken {
                chunk: "Hello there.".into(),
            },
            AgentEvent::StreamEnd,
        ];
        produce_agent_events(turn.clone(), stream_of(events), default_classifier()).await;

        assert!(turn.token_stream_closed());
        assert_eq!(turn.response_content(), "Hello there.");
        drop(token_rx);
    }

    #[tokio::test]
    async fn consumer_emits_chunk_then_stream_end() {
        let turn = make_turn();
        let mut event_rx = turn.take_event_receiver().unwrap();
        let token_rx = turn.open_token_stream();
        let token_tx = turn.token_sender().unwrap();

        token_tx.send("Hello world.".to_string()).await.unwrap();
        drop(token_tx);
        turn.close_token_stream();

        consume_token_events(turn.clone(), token_rx).await;

        let first = event_rx.recv().await.unwrap();
        match first {
            ServerFrame::TtsReadyChunk { chunk, .. } => assert_eq!(chunk, "Hello world."),
            other => panic!("unexpected frame: {other:?}"),
        }
        let second = event_rx.recv().await.unwrap();
        assert!(matches!(second, ServerFrame::StreamEnd { .. }));
    }

    #[tokio::test]
    async fn tool_call_then_result_tracks_duration_and_status() {
        let turn = make_turn();
        let token_rx = turn.open_token_stream();

        let events = vec![
            AgentEvent::ToolCall {
                tool_name: "web_search".into(),
                args: "{\"q\":\"x\"}".into(),
            },
            AgentEvent::ToolResult {
                result: "Found 5 articles".into(),
                node: None,
            },
            AgentEvent::StreamEnd,
        ];
        produce_agent_events(turn.clone(), stream_of(events), default_classifier()).await;
        drop(token_rx);

        // The tool-result consumed the matching tool-call's start time, so a
        // second result with no prior call falls back to "unknown"/0ms
        // instead of panicking or reusing the stale entry.
        assert!(turn.take_last_tool_call().is_none());
    }

    #[tokio::test]
    async fn cancelled_consumer_does_not_emit_its_own_stream_end() {
        let turn = make_turn();
        let mut event_rx = turn.take_event_receiver().unwrap();
        let token_rx = turn.open_token_stream();
        let token_tx = turn.token_sender().unwrap();

        turn.cancel.cancel();
        token_tx.send("Hello.".to_string()).await.unwrap();
        drop(token_tx);

        consume_token_events(turn.clone(), token_rx).await;

        // No frame at all: cancellation is checked before the sentence is
        // even processed, and no terminal frame is emitted (the caller that
        // cancelled the turn is responsible for the synthetic one).
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stage_direction_only_sentence_is_dropped_silently() {
        let turn = make_turn();
        let mut event_rx = turn.take_event_receiver().unwrap();
        let token_rx = turn.open_token_stream();
        let token_tx = turn.token_sender().unwrap();

        token_tx.send("*waves*.".to_string()).await.unwrap();
        drop(token_tx);
        turn.close_token_stream();

        consume_token_events(turn.clone(), token_rx).await;

        let only = event_rx.recv().await.unwrap();
        assert!(matches!(only, ServerFrame::StreamEnd { .. }));
    }
}
