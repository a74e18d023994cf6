//! Real-time conversational WebSocket gateway: authenticates clients,
//! mediates a single in-flight turn per connection against an injected
//! agent stream, and forwards TTS-ready sentence chunks back out.

pub mod auth;
pub mod cli;
pub mod connection;
pub mod handlers;
pub mod heartbeat;
pub mod manager;
pub mod runtime;
pub mod state;
pub mod ws;
