//! nostr-bouncer server entry point.
//!
//! Starts the Axum server that accepts client WebSockets and bounces them
//! to the configured relays.

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use nostr_bouncer::api;
use nostr_bouncer::app_state::AppState;
use nostr_bouncer::config::BouncerConfig;
use nostr_bouncer::relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BouncerConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // TLS provider for wss:// relays
    if !relay::install_crypto_provider() {
        tracing::error!("failed to install the rustls crypto provider; wss:// relays will fail");
    }

    tracing::info!(
        addr = %config.listen_addr,
        relays = config.session.relays.len(),
        "starting nostr-bouncer"
    );

    let app = api::build_router(AppState::new(config.session));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
