//! `MessageProcessor`: owns at most one active turn per connection and
//! drives it from creation through completion/interruption/cleanup.
//!
//! Grounded on `message_processor/processor.py`'s `MessageProcessor`. The
//! "one active turn" invariant (SPEC_FULL.md §9) is enforced by
//! `start_turn` returning `Error::TurnBusy` instead of the teacher's
//! blocking session-lock wait — a conversational turn is meant to be
//! interrupted, not queued behind another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use vb_domain::agent_stream::{AgentStream, ToolResultClassifier};
use vb_domain::turn::TurnStatus;
use vb_domain::{Error, Result};
use vb_protocol::ServerFrame;
use vb_text::TtsCleaner;

use super::event_handler::{consume_token_events, produce_agent_events};
use super::task_manager::{self, cancel_turn_tasks};
use super::turn::Turn;

#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    pub active_turns: usize,
    pub total_turns: usize,
}

/// Per-connection turn lifecycle manager. One instance lives inside each
/// `ConnectionState`; it is not shared across connections.
pub struct MessageProcessor {
    turns: Mutex<HashMap<String, Arc<Turn>>>,
    current_turn_id: Mutex<Option<String>>,
    total_turns: Mutex<usize>,
    shutting_down: AtomicBool,
    tts: Arc<TtsCleaner>,
    interrupt_wait_timeout: Duration,
    classifier: ToolResultClassifier,
}

impl MessageProcessor {
    pub fn new(
        tts: Arc<TtsCleaner>,
        interrupt_wait_timeout: Duration,
        classifier: ToolResultClassifier,
    ) -> Self {
        Self {
            turns: Mutex::new(HashMap::new()),
            current_turn_id: Mutex::new(None),
            total_turns: Mutex::new(0),
            shutting_down: AtomicBool::new(false),
            tts,
            interrupt_wait_timeout,
            classifier,
        }
    }

    /// Creates a new turn and marks it current. Fails if the processor is
    /// shutting down, or if a turn is already active (invariant §9: one
    /// in-flight turn per connection).
    #[instrument(skip(self, metadata))]
    pub fn start_turn(
        &self,
        conversation_id: Uuid,
        user_message: String,
        agent_id: String,
        user_id: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<Arc<Turn>> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::Other("processor is shutting down".into()));
        }

        let mut current = self.current_turn_id.lock();
        if let Some(existing) = current.as_ref() {
            return Err(Error::TurnBusy(existing.clone()));
        }

        let turn_id = Uuid::new_v4().to_string();
        let turn = Arc::new(Turn::new(
            turn_id.clone(),
            conversation_id,
            user_message,
            agent_id,
            user_id,
            metadata,
            self.tts.clone(),
        ));

        self.turns.lock().insert(turn_id.clone(), turn.clone());
        *current = Some(turn_id);
        *self.total_turns.lock() += 1;

        Ok(turn)
    }

    /// Wires `stream` into `turn`'s producer/consumer task pair and marks
    /// the turn `Processing`.
    pub fn attach_agent_stream(&self, turn: &Arc<Turn>, stream: AgentStream) {
        turn.set_status(TurnStatus::Processing, None);

        let token_rx = turn.open_token_stream();
        let classifier = self.classifier.clone();

        let producer_turn = turn.clone();
        let producer = tokio::spawn(async move {
            produce_agent_events(producer_turn, stream, classifier).await;
        });
        task_manager::track_task(turn, producer);

        let consumer_turn = turn.clone();
        task_manager::ensure_token_consumer(turn, move || {
            tokio::spawn(async move {
                consume_token_events(consumer_turn, token_rx).await;
            })
        });
    }

    /// Interrupts `turn_id` if it's still active: cancels its tasks, marks
    /// it `Interrupted`, delivers exactly one synthetic terminal
    /// `stream_end{status: "interrupted"}`, and cleans it up. Returns
    /// `Ok(false)` without touching the turn if it already reached a
    /// terminal status (e.g. it raced `complete_turn`/`fail_turn` and
    /// finished on its own just before this call); `Err` if it's unknown.
    pub async fn interrupt_turn(&self, turn_id: &str) -> Result<bool> {
        let turn = match self.get_turn(turn_id) {
            Some(t) => t,
            None => return Err(Error::UnknownTurn(turn_id.to_string())),
        };
        if turn.status().is_terminal() {
            return Ok(false);
        }
        cancel_turn_tasks(&turn, self.interrupt_wait_timeout).await;
        turn.set_status(TurnStatus::Interrupted, None);
        let _ = turn
            .event_sender()
            .send(ServerFrame::StreamEnd {
                turn_id: turn.turn_id.clone(),
                reason: Some("interrupted".into()),
                status: Some("interrupted".into()),
            })
            .await;
        // Tasks are already cancelled above; skip cleanup's own
        // cancel_turn_tasks call instead of re-draining an already-empty
        // task list.
        self.cleanup_impl(turn_id, false).await;
        Ok(true)
    }

    /// Interrupts every non-terminal turn this processor knows about.
    pub async fn interrupt_all_active_turns(&self) {
        let active: Vec<String> = self
            .turns
            .lock()
            .values()
            .filter(|t| !t.status().is_terminal())
            .map(|t| t.turn_id.clone())
            .collect();
        for turn_id in active {
            let _ = self.interrupt_turn(&turn_id).await;
        }
    }

    /// Marks `turn_id` completed and cleans it up.
    pub async fn complete_turn(&self, turn_id: &str) {
        if let Some(turn) = self.get_turn(turn_id) {
            turn.set_status(TurnStatus::Completed, None);
            self.cleanup(turn_id).await;
        }
    }

    /// Marks `turn_id` failed with `error` and cleans it up.
    pub async fn fail_turn(&self, turn_id: &str, error: String) {
        if let Some(turn) = self.get_turn(turn_id) {
            turn.set_status(TurnStatus::Failed, Some(error));
            self.cleanup(turn_id).await;
        }
    }

    /// Cancels any remaining tasks, removes the turn from the table, and
    /// clears `current_turn_id` if it still points at this turn. Also
    /// drains the turn's event queue if nothing ever claimed it (the
    /// receiver is still sitting on the turn, unforwarded). Safe to call
    /// more than once for the same turn.
    pub async fn cleanup(&self, turn_id: &str) {
        self.cleanup_impl(turn_id, true).await;
    }

    /// `cleanup`'s body, with `cancel_tasks` controlling whether it redoes
    /// `cancel_turn_tasks` — `interrupt_turn` already calls it (and needs to,
    /// before sending its synthetic terminal frame), so its own call into
    /// here skips a second, always-no-op pass over an already-drained task list.
    async fn cleanup_impl(&self, turn_id: &str, cancel_tasks: bool) {
        let turn = self.turns.lock().remove(turn_id);
        if let Some(turn) = turn {
            if cancel_tasks {
                cancel_turn_tasks(&turn, self.interrupt_wait_timeout).await;
            }
            if let Some(mut rx) = turn.take_event_receiver() {
                let drained = task_manager::drain_event_queue(&mut rx);
                if drained > 0 {
                    debug!(turn_id, drained, "drained unclaimed event queue on cleanup");
                }
            }
        }

        let mut current = self.current_turn_id.lock();
        if current.as_deref() == Some(turn_id) {
            *current = None;
        }
    }

    /// Evicts terminal turns whose last update is older than
    /// `max_age_seconds` — a backstop for turns whose
    /// `complete_turn`/`fail_turn`/`interrupt_turn` caller never ran.
    /// Returns the number evicted.
    pub async fn cleanup_completed_turns(&self, max_age_seconds: i64) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .turns
            .lock()
            .values()
            .filter(|t| {
                t.status().is_terminal()
                    && now.signed_duration_since(t.updated_at()).num_seconds() >= max_age_seconds
            })
            .map(|t| t.turn_id.clone())
            .collect();
        let count = stale.len();
        for turn_id in stale {
            self.cleanup(&turn_id).await;
        }
        count
    }

    /// Rejects future `start_turn` calls and interrupts whatever is
    /// currently running. Called when the owning connection closes.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.interrupt_all_active_turns().await;
        info!("message processor shut down");
    }

    pub fn get_turn(&self, turn_id: &str) -> Option<Arc<Turn>> {
        self.turns.lock().get(turn_id).cloned()
    }

    pub fn get_active_turns(&self) -> Vec<Arc<Turn>> {
        self.turns
            .lock()
            .values()
            .filter(|t| !t.status().is_terminal())
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> ProcessorStats {
        ProcessorStats {
            active_turns: self.get_active_turns().len(),
            total_turns: *self.total_turns.lock(),
        }
    }
}
