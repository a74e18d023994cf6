//! Shared application state: configuration, the connection registry, the
//! TTS cleaner, and the pluggable collaborators the rest of the crate
//! injects (auth, agent stream, tool-result classification).
//!
//! Grounded on the teacher's `state.rs` (Arc-wrapped field grouping),
//! scaled down to this gateway's much smaller set of concerns.

use std::sync::Arc;

use vb_domain::agent_stream::{AgentStream, ToolResultClassifier};
use vb_domain::config::GatewayConfig;
use vb_text::TtsCleaner;

use crate::auth::TokenAuthenticator;
use crate::manager::ConnectionRegistry;

/// Request passed to the injected [`AgentStreamFactory`] when a client
/// sends a `chat_message` frame (SPEC_FULL.md §6.2).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub content: String,
    pub agent_id: String,
    pub user_id: String,
    pub conversation_id: uuid::Uuid,
    pub metadata: Option<serde_json::Value>,
    pub images: Option<Vec<String>>,
}

/// Produces the agent's event stream for one turn. The core has no
/// opinion on what's behind this — an LLM call, a scripted fixture, a
/// remote RPC — only that it yields [`vb_domain::agent_stream::AgentEvent`]s
/// (SPEC_FULL.md §6.2).
pub type AgentStreamFactory = Arc<dyn Fn(&ChatRequest) -> AgentStream + Send + Sync>;

pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub tts: Arc<TtsCleaner>,
    pub authenticator: Arc<dyn TokenAuthenticator>,
    pub agent_stream_factory: AgentStreamFactory,
    pub tool_result_classifier: ToolResultClassifier,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        authenticator: Arc<dyn TokenAuthenticator>,
        agent_stream_factory: AgentStreamFactory,
    ) -> Self {
        let rules = match &config.tts_rules_path {
            Some(path) => vb_text::load_rules(std::path::Path::new(path)),
            None => vb_text::rules::default_rules(),
        };
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            tts: Arc::new(TtsCleaner::new(rules)),
            authenticator,
            agent_stream_factory,
            tool_result_classifier: vb_domain::agent_stream::default_classifier(),
        }
    }
}
