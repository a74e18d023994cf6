use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vb_domain::agent_stream::{AgentEvent, AgentStream};
use vb_domain::config::{CorsConfig, GatewayConfig};
use vb_gateway::auth::DefaultAuthenticator;
use vb_gateway::cli::{Cli, Command, ConfigCommand};
use vb_gateway::state::{AppState, ChatRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            init_tracing();
            let (config, _path) = vb_gateway::cli::load_config(None)?;
            run_server(config).await
        }
        Some(Command::Serve { config, host, port }) => {
            init_tracing();
            let (mut config, _path) = vb_gateway::cli::load_config(config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Show { config })) => {
            let (config, _path) = vb_gateway::cli::load_config(config.as_deref())?;
            vb_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("vb-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vb_gateway=debug")),
        )
        .json()
        .init();
}

/// The gateway ships without an opinion on how agent responses are
/// produced; a real deployment replaces this with a stream backed by an
/// actual LLM/agent runtime (SPEC_FULL.md §6.2). This placeholder echoes
/// the user's message back as a single sentence, so `vb-gateway serve`
/// is runnable and testable out of the box.
fn echo_agent_stream(request: &ChatRequest) -> AgentStream {
    let reply = format!("You said: {}", request.content);
    Box::pin(futures_util::stream::iter(vec![
        AgentEvent::StreamStart,
        AgentEvent::StreamToken { chunk: reply },
        AgentEvent::StreamEnd,
    ]))
}

/// How long a turn sits around in a terminal status before a sweep evicts it
/// (SPEC_FULL.md §4.E). Generous relative to `STALE_TURN_SWEEP_INTERVAL` so a
/// client that's slow to read its own turn's final frame isn't punished for it.
const STALE_TURN_MAX_AGE_SECS: i64 = 300;

/// How often the background sweep runs.
const STALE_TURN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    tracing::info!("voicebridge gateway starting");

    let cors_layer = build_cors_layer(&config.server.cors);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(
        config,
        Arc::new(DefaultAuthenticator),
        Arc::new(echo_agent_stream),
    ));

    spawn_stale_turn_sweeper(state.registry.clone());

    let app = Router::new()
        .route("/ws", get(vb_gateway::ws::upgrade))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically evicts terminal turns older than `STALE_TURN_MAX_AGE_SECS`
/// across every live connection, so a turn whose client never reconnects to
/// read its final frame doesn't linger in a `MessageProcessor`'s turn table
/// forever (SPEC_FULL.md §4.E).
fn spawn_stale_turn_sweeper(registry: Arc<vb_gateway::manager::ConnectionRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STALE_TURN_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = registry.sweep_stale_turns(STALE_TURN_MAX_AGE_SECS).await;
            if evicted > 0 {
                tracing::debug!(evicted, "swept stale turns");
            }
        }
    });
}

/// Builds a permissive-but-bounded CORS layer. Entries ending in `:*`
/// (e.g. `http://localhost:*`) match any port on that host; a literal
/// `"*"` allows all origins (not recommended for production).
///
/// Grounded on the teacher's `build_cors_layer`.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
