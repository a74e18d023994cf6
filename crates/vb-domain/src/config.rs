use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tunables named in SPEC_FULL.md §6.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Capacity of each turn's event queue and token queue.
    #[serde(default = "d_queue_size")]
    pub queue_size: usize,

    #[serde(default = "d_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default = "d_pong_timeout_secs")]
    pub pong_timeout_secs: u64,

    #[serde(default = "d_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    #[serde(default = "d_interrupt_wait_timeout_ms")]
    pub interrupt_wait_timeout_ms: u64,

    #[serde(default = "d_error_backoff_ms")]
    pub error_backoff_ms: u64,

    #[serde(default = "d_max_frame_errors")]
    pub max_frame_errors: u32,

    #[serde(default = "d_reasoning_start_tag")]
    pub reasoning_start_tag: String,

    #[serde(default = "d_reasoning_end_tag")]
    pub reasoning_end_tag: String,

    /// Path to the TTS cleanup rules file (YAML or JSON). `None` uses defaults.
    #[serde(default)]
    pub tts_rules_path: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue_size: d_queue_size(),
            ping_interval_secs: d_ping_interval_secs(),
            pong_timeout_secs: d_pong_timeout_secs(),
            inactivity_timeout_secs: d_inactivity_timeout_secs(),
            interrupt_wait_timeout_ms: d_interrupt_wait_timeout_ms(),
            error_backoff_ms: d_error_backoff_ms(),
            max_frame_errors: d_max_frame_errors(),
            reasoning_start_tag: d_reasoning_start_tag(),
            reasoning_end_tag: d_reasoning_end_tag(),
            tts_rules_path: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits. Missing file is not an error — it is equivalent
    /// to an empty file.
    pub fn load_from_path(path: &std::path::Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::Error::Config(e.to_string()))
    }

    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn interrupt_wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interrupt_wait_timeout_ms)
    }

    pub fn error_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.error_backoff_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_queue_size() -> usize {
    100
}
fn d_ping_interval_secs() -> u64 {
    30
}
fn d_pong_timeout_secs() -> u64 {
    10
}
fn d_inactivity_timeout_secs() -> u64 {
    300
}
fn d_interrupt_wait_timeout_ms() -> u64 {
    1000
}
fn d_error_backoff_ms() -> u64 {
    500
}
fn d_max_frame_errors() -> u32 {
    5
}
fn d_reasoning_start_tag() -> String {
    "<think>".into()
}
fn d_reasoning_end_tag() -> String {
    "</think>".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.queue_size, 100);
        assert_eq!(cfg.ping_interval_secs, 30);
        assert_eq!(cfg.pong_timeout_secs, 10);
        assert_eq!(cfg.inactivity_timeout_secs, 300);
        assert_eq!(cfg.interrupt_wait_timeout_ms, 1000);
        assert_eq!(cfg.error_backoff_ms, 500);
        assert_eq!(cfg.max_frame_errors, 5);
        assert_eq!(cfg.reasoning_start_tag, "<think>");
        assert_eq!(cfg.reasoning_end_tag, "</think>");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg = GatewayConfig::load_from_path(&path).unwrap();
        assert_eq!(cfg.queue_size, 100);
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "queue_size = 16\n[server]\nport = 9090\n").unwrap();
        let cfg = GatewayConfig::load_from_path(&path).unwrap();
        assert_eq!(cfg.queue_size, 16);
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.ping_interval_secs, 30);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "queue_size = [").unwrap();
        assert!(GatewayConfig::load_from_path(&path).is_err());
    }
}
