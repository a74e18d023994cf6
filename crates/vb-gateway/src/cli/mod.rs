pub mod config;

use clap::{Parser, Subcommand};

/// voicebridge — a real-time conversational WebSocket gateway.
#[derive(Debug, Parser)]
#[command(name = "vb-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve {
        /// Path to the config file.
        #[arg(long)]
        config: Option<String>,
        /// Override the listen host from the config file.
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port from the config file.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Dump the resolved configuration (with defaults) as TOML.
    Show {
        /// Path to the config file.
        #[arg(long)]
        config: Option<String>,
    },
}

/// Environment variable naming the config file path, checked before the
/// `config.toml` default.
pub const CONFIG_ENV_VAR: &str = "VB_CONFIG";

/// Resolves the config path from an explicit CLI flag, then `VB_CONFIG`,
/// then `config.toml`, and loads it.
pub fn load_config(explicit_path: Option<&str>) -> anyhow::Result<(vb_domain::config::GatewayConfig, String)> {
    let config_path = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| "config.toml".into());

    let config = vb_domain::config::GatewayConfig::load_from_path(std::path::Path::new(&config_path))
        .map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;

    Ok((config, config_path))
}
