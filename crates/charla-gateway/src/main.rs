use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use charla_gateway::{app, provider};

#[derive(Parser)]
#[command(name = "charla-gateway", about = "Multi-channel conversational bot runtime")]
struct Cli {
    /// Path to charla.toml (default: ~/.charla/charla.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charla_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("CHARLA_CONFIG").ok());
    let config = charla_core::CharlaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        charla_core::CharlaConfig::default()
    });

    // Concrete AI providers and channel adapters are wired by the
    // deployment; the engine runs with placeholders until then.
    let ai = Arc::new(provider::UnconfiguredProvider);
    let channels = charla_channels::ChannelManager::new();

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = app::AppState::build(config, ai, channels)?;

    // Background duties: idle MCP reaping and the post scheduler.
    charla_mcp::McpGateway::spawn_idle_sweeper(state.mcp.clone());
    tokio::spawn(state.scheduler.clone().run(state.shutdown_rx()));

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("charla gateway listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
