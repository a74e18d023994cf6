//! The `Turn` record: state shared between the handler that started a turn,
//! the event-handler tasks producing/consuming agent output, and whatever
//! later asks about the turn's status (SPEC_FULL.md §3).
//!
//! Grounded on `message_processor/models.py`'s `ConversationTurn` dataclass.
//! Python's `token_queue` + `TOKEN_QUEUE_SENTINEL` marker-object pattern
//! becomes, here, an `mpsc::Sender<String>` whose drop closes the channel —
//! the consumer observes `None` from `recv()` and treats that as end-of-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use vb_domain::turn::TurnStatus;
use vb_protocol::ServerFrame;
use vb_text::{SentenceChunker, TtsCleaner};

use super::cancel::CancelToken;

/// Queue depth for both the outbound server-frame queue and the raw-token
/// queue. Bounded so a slow client applies backpressure to the agent stream
/// instead of letting memory grow unbounded (SPEC_FULL.md §6.3).
pub const QUEUE_CAPACITY: usize = 256;

/// One in-flight (or just-finished) conversation turn.
///
/// A `Turn` is created by `MessageProcessor::start_turn` and lives until
/// `cleanup()` removes it from the processor's turn table. Mutable pieces
/// are behind interior mutability so the record can be shared via `Arc`
/// across the producer task, the token-consumer task, and the handler that
/// forwards `event_rx` out to the client socket.
#[derive(Debug)]
pub struct Turn {
    pub turn_id: String,
    pub conversation_id: Uuid,
    pub user_message: String,
    pub agent_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,

    status: Mutex<TurnStatus>,
    updated_at: Mutex<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,

    response_content: Mutex<String>,
    error_message: Mutex<Option<String>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,

    event_tx: mpsc::Sender<ServerFrame>,
    event_rx: Mutex<Option<mpsc::Receiver<ServerFrame>>>,

    token_tx: Mutex<Option<mpsc::Sender<String>>>,
    token_consumer_task: Mutex<Option<JoinHandle<()>>>,
    token_stream_closed: AtomicBool,

    chunk_processor: Mutex<SentenceChunker>,
    tts_processor: Arc<TtsCleaner>,

    /// The most recently started tool call's name and start time, for
    /// `duration_ms` tracking when its `tool_result` arrives (SPEC_FULL.md
    /// §4.C). Keyed by turn, not by tool name, matching the original's
    /// "most recent call" semantics — see SPEC_FULL.md §11 on the resulting
    /// ambiguity under concurrent calls of the same tool.
    last_tool_call: Mutex<Option<(String, Instant)>>,

    pub cancel: CancelToken,
}

impl Turn {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        turn_id: String,
        conversation_id: Uuid,
        user_message: String,
        agent_id: String,
        user_id: String,
        metadata: Option<serde_json::Value>,
        tts_processor: Arc<TtsCleaner>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let now = Utc::now();
        Self {
            turn_id,
            conversation_id,
            user_message,
            agent_id,
            user_id,
            created_at: now,
            status: Mutex::new(TurnStatus::Pending),
            updated_at: Mutex::new(now),
            metadata,
            response_content: Mutex::new(String::new()),
            error_message: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            token_tx: Mutex::new(None),
            token_consumer_task: Mutex::new(None),
            token_stream_closed: AtomicBool::new(false),
            chunk_processor: Mutex::new(SentenceChunker::default()),
            tts_processor,
            last_tool_call: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    pub fn status(&self) -> TurnStatus {
        *self.status.lock()
    }

    /// Transition to `status`. Terminal statuses never transition again
    /// (invariant §3.2); attempting to do so is a silent no-op so a racing
    /// `fail_turn`/`complete_turn` pair can't clobber whichever lands first.
    pub fn set_status(&self, status: TurnStatus, error_message: Option<String>) {
        let mut current = self.status.lock();
        if current.is_terminal() {
            return;
        }
        *current = status;
        *self.updated_at.lock() = Utc::now();
        if let Some(msg) = error_message {
            *self.error_message.lock() = Some(msg);
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.lock()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().clone()
    }

    pub fn append_response(&self, text: &str) {
        self.response_content.lock().push_str(text);
    }

    pub fn response_content(&self) -> String {
        self.response_content.lock().clone()
    }

    pub fn event_sender(&self) -> mpsc::Sender<ServerFrame> {
        self.event_tx.clone()
    }

    /// Takes the event receiver for forwarding to the client socket. Can
    /// only be taken once; subsequent calls get `None`.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<ServerFrame>> {
        self.event_rx.lock().take()
    }

    pub fn chunker(&self) -> &Mutex<SentenceChunker> {
        &self.chunk_processor
    }

    pub fn tts(&self) -> &TtsCleaner {
        &self.tts_processor
    }

    /// Creates the raw-token channel the agent producer writes into, storing
    /// the sender so `token_sender()` can hand out further clones and
    /// `close_token_stream()` can drop the last one to signal end-of-stream.
    pub fn open_token_stream(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        *self.token_tx.lock() = Some(tx);
        rx
    }

    pub fn token_sender(&self) -> Option<mpsc::Sender<String>> {
        self.token_tx.lock().clone()
    }

    /// Drops the stored sender, closing the channel so the consumer's next
    /// `recv()` returns `None`. Idempotent.
    pub fn close_token_stream(&self) {
        self.token_tx.lock().take();
        self.token_stream_closed.store(true, Ordering::Release);
    }

    pub fn token_stream_closed(&self) -> bool {
        self.token_stream_closed.load(Ordering::Acquire)
    }

    pub fn set_token_consumer_task(&self, handle: JoinHandle<()>) {
        *self.token_consumer_task.lock() = Some(handle);
    }

    pub fn take_token_consumer_task(&self) -> Option<JoinHandle<()>> {
        self.token_consumer_task.lock().take()
    }

    /// Records that a tool call named `tool_name` just started.
    pub fn record_tool_call_start(&self, tool_name: &str) {
        *self.last_tool_call.lock() = Some((tool_name.to_string(), Instant::now()));
    }

    /// Takes the most recently recorded tool call's name and elapsed
    /// duration, for logging against its matching `tool_result`. `None` if
    /// no call was recorded, or it was already consumed by an earlier result.
    pub fn take_last_tool_call(&self) -> Option<(String, Duration)> {
        self.last_tool_call
            .lock()
            .take()
            .map(|(name, start)| (name, start.elapsed()))
    }

    pub fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn drain_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_turn() -> Turn {
        Turn::new(
            "t1".into(),
            Uuid::new_v4(),
            "hello".into(),
            "agent-1".into(),
            "user-1".into(),
            None,
            Arc::new(TtsCleaner::new(Vec::new())),
        )
    }

    #[test]
    fn starts_pending() {
        let turn = make_turn();
        assert_eq!(turn.status(), TurnStatus::Pending);
    }

    #[test]
    fn terminal_status_does_not_transition_again() {
        let turn = make_turn();
        turn.set_status(TurnStatus::Completed, None);
        turn.set_status(TurnStatus::Failed, Some("too late".into()));
        assert_eq!(turn.status(), TurnStatus::Completed);
        assert!(turn.error_message().is_none());
    }

    #[test]
    fn event_receiver_can_only_be_taken_once() {
        let turn = make_turn();
        assert!(turn.take_event_receiver().is_some());
        assert!(turn.take_event_receiver().is_none());
    }

    #[test]
    fn closing_token_stream_is_idempotent() {
        let turn = make_turn();
        let _rx = turn.open_token_stream();
        assert!(turn.token_sender().is_some());
        turn.close_token_stream();
        turn.close_token_stream();
        assert!(turn.token_sender().is_none());
        assert!(turn.token_stream_closed());
    }

    #[test]
    fn tool_call_start_is_consumed_once_by_the_matching_result() {
        let turn = make_turn();
        assert!(turn.take_last_tool_call().is_none());

        turn.record_tool_call_start("web_search");
        let (name, elapsed) = turn.take_last_tool_call().unwrap();
        assert_eq!(name, "web_search");
        assert!(elapsed >= std::time::Duration::ZERO);

        assert!(turn.take_last_tool_call().is_none());
    }

    #[test]
    fn appended_response_accumulates() {
        let turn = make_turn();
        turn.append_response("Hello");
        turn.append_response(", world.");
        assert_eq!(turn.response_content(), "Hello, world.");
    }
}
