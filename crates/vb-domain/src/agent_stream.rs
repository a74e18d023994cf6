use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A boxed async stream of agent events, produced by the injected agent collaborator.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One record from the agent's event sequence (see SPEC_FULL.md §6.2).
///
/// The core consumes this sequence exactly once per turn; it makes no
/// assumption about how expensive it is to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "stream_start")]
    StreamStart,

    #[serde(rename = "stream_token")]
    StreamToken { chunk: String },

    #[serde(rename = "tool_call")]
    ToolCall { tool_name: String, args: String },

    #[serde(rename = "tool_result")]
    ToolResult {
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    #[serde(rename = "stream_end")]
    StreamEnd,

    #[serde(rename = "error")]
    Error { error: String },
}

impl AgentEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            AgentEvent::StreamStart => "stream_start",
            AgentEvent::StreamToken { .. } => "stream_token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::StreamEnd => "stream_end",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// A finite, single-pass, lazily-produced sequence of agent events for one turn.
pub type AgentStream = BoxStream<'static, AgentEvent>;

/// Default heuristic for classifying a tool result's text as success/error.
///
/// Kept as the shipped default (see SPEC_FULL.md §9, "tool-result success/error
/// classification"); callers needing precision should supply their own
/// classifier via `ToolResultClassifier`.
pub fn default_tool_result_is_error(result: &str) -> bool {
    let lowered = result.to_lowercase();
    ["error", "failed", "exception"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

/// Pluggable hook for classifying a tool result as success or error.
pub type ToolResultClassifier = std::sync::Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub fn default_classifier() -> ToolResultClassifier {
    std::sync::Arc::new(default_tool_result_is_error)
}
