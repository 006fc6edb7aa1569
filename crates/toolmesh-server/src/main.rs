//! toolmesh HTTP server

mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolmesh_core::{
    ConfigProvider, ConversationStore, FileConfigProvider, MemoryConversationStore, SharedLogger,
    SqliteConversationStore, StdioConnector, TracingLogger,
};

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "toolmesh-server", version, about = "Streamed chat turns over MCP tool providers")]
struct Args {
    /// Config file; defaults to $TOOLMESH_CONFIG, then .config/toolmesh/config.yaml, then the user config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.listen`
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    let cwd = std::env::current_dir()?;
    let config_provider = FileConfigProvider::discover(args.config, &cwd);
    let config = config_provider.load().await?;
    tracing::info!(
        "config: {} ({}{})",
        config_provider.path().display(),
        config_provider.level().as_str(),
        if config_provider.exists() { "" } else { ", built-in defaults" }
    );

    let logger: SharedLogger = Arc::new(TracingLogger::default());
    let store: Arc<dyn ConversationStore> = match &config.storage.database {
        Some(path) => {
            tracing::info!("conversations: {}", path.display());
            Arc::new(SqliteConversationStore::open(path)?)
        }
        None => {
            tracing::info!("conversations: in memory");
            Arc::new(MemoryConversationStore::new())
        }
    };

    let connector = Arc::new(StdioConnector::new(Arc::clone(&logger)));
    let state = AppState::from_config(&config, connector, store, logger);

    // Warm provider connections; failures are logged and retried on the first turn
    let connections = Arc::clone(&state.connections);
    tokio::spawn(async move {
        connections.connect_all().await;
    });

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = TcpListener::bind(&listen).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, routes::router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.connections.disconnect_all().await;
    tracing::info!("tool providers disconnected");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("shutting down");
}
