//! Bookkeeping for a turn's background tasks: the producer that drains the
//! agent stream, and the consumer that drains raw tokens into TTS chunks.
//!
//! Grounded on `message_processor/task_manager.py`'s `TaskManager`.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::turn::Turn;

/// Registers `handle` as one of `turn`'s background tasks so
/// `cancel_turn_tasks` can find and stop it later.
pub fn track_task(turn: &Arc<Turn>, handle: tokio::task::JoinHandle<()>) {
    turn.track_task(handle);
}

/// Spawns the token-consumer task via `spawn` unless one is already running.
/// Mirrors `ensure_token_consumer`'s guard against double-spawning a
/// consumer for the same turn when multiple agent events arrive in quick
/// succession.
pub fn ensure_token_consumer<F>(turn: &Arc<Turn>, spawn: F)
where
    F: FnOnce() -> tokio::task::JoinHandle<()>,
{
    let mut existing = turn.take_token_consumer_task();
    let needs_spawn = match &existing {
        Some(handle) => handle.is_finished(),
        None => true,
    };
    if needs_spawn {
        if let Some(stale) = existing.take() {
            stale.abort();
        }
        turn.set_token_consumer_task(spawn());
    } else if let Some(handle) = existing {
        turn.set_token_consumer_task(handle);
    }
}

/// Signals cancellation, closes the token stream, and aborts every
/// generically tracked task (the producer), giving each up to `timeout` to
/// unwind via its `JoinHandle` before the abort takes effect. The token
/// consumer is handled separately: it is awaited, not aborted, so its
/// in-flight sentence flush completes (SPEC_FULL.md §4.D) — closing the
/// token stream above is what lets it notice end-of-stream and return on
/// its own. Returns the number of producer-side tasks that were still
/// running (and therefore aborted) when this was called.
pub async fn cancel_turn_tasks(turn: &Arc<Turn>, timeout: Duration) -> usize {
    turn.cancel.cancel();
    turn.close_token_stream();

    let mut aborted = 0;
    for handle in turn.drain_tasks() {
        if handle.is_finished() {
            continue;
        }
        aborted += 1;
        handle.abort();
        if tokio::time::timeout(timeout, handle).await.is_err() {
            warn!(turn_id = %turn.turn_id, "task did not unwind within interrupt wait timeout");
        }
    }

    if let Some(consumer) = turn.take_token_consumer_task() {
        if !consumer.is_finished() && tokio::time::timeout(timeout, consumer).await.is_err() {
            warn!(turn_id = %turn.turn_id, "token consumer did not finish within interrupt wait timeout");
        }
    }

    aborted
}

/// Drains and discards any frames still buffered on `rx`, for callers
/// cleaning up a turn whose event receiver was never (or is no longer)
/// forwarded to a client socket. Returns the number of frames discarded.
pub fn drain_event_queue(rx: &mut tokio::sync::mpsc::Receiver<vb_protocol::ServerFrame>) -> usize {
    let mut drained = 0;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    drained
}
