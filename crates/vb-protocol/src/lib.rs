//! Wire frames exchanged between a client and the conversational gateway.
//!
//! Transport is JSON text frames, UTF-8, one message per frame
//! (SPEC_FULL.md §6.1). `ClientFrame` covers everything the gateway accepts;
//! `ServerFrame` covers everything it emits. `tool_call`/`tool_result` are
//! intentionally absent from `ServerFrame` — they never reach a client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Close code sent when a connection is dropped for missing a heartbeat.
pub const CLOSE_PING_TIMEOUT: u16 = 4000;
/// Close code sent when authentication fails.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// `error.code` used when a turn was interrupted on request.
pub const CODE_INTERRUPTED: i32 = 4003;
/// `error.code` used when an interrupt request had nothing to act on.
pub const CODE_NOTHING_TO_INTERRUPT: i32 = 4004;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "authorize")]
    Authorize { token: String },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "chat_message")]
    ChatMessage {
        content: String,
        agent_id: String,
        user_id: String,
        #[serde(default)]
        conversation_id: Option<Uuid>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
        #[serde(default)]
        images: Option<Vec<String>>,
    },

    #[serde(rename = "interrupt_stream")]
    InterruptStream {
        #[serde(default)]
        turn_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "authorize_success")]
    AuthorizeSuccess { connection_id: Uuid },

    #[serde(rename = "authorize_error")]
    AuthorizeError { error: String },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "stream_start")]
    StreamStart {
        turn_id: String,
        connection_id: Uuid,
        user_id: String,
    },

    #[serde(rename = "tts_ready_chunk")]
    TtsReadyChunk {
        turn_id: String,
        chunk: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },

    #[serde(rename = "stream_end")]
    StreamEnd {
        turn_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: i32) -> Self {
        ServerFrame::Error {
            error: message.into(),
            code: Some(code),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
