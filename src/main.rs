use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use pdf_chat::{AppState, Config, router};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();
    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {} (expected host:port)", config.server.bind))?;

    tracing::info!(
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        stream = config.llm.stream,
        "Using Ollama backend"
    );

    let app = router(AppState::with_ollama(config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "Starting pdf-chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
