//! courier-server - receive delivered files and persist them atomically.

use clap::Parser;
use filecourier::cli::ServerArgs;
use filecourier::config::Config;
use filecourier::heartbeat::heartbeat_task;
use filecourier::receiver::{router, DestStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args = ServerArgs::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filecourier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(destination) = args.destination {
        config.server.destination = destination;
    }

    let store = DestStore::new(
        config.server.destination.clone(),
        config.server.allowed.clone(),
        Duration::from_millis(config.server.lock_wait_ms),
    )
    .expect("Failed to prepare destination root");
    let store = Arc::new(store);
    tracing::info!("Upload folder: {}", store.root().display());

    let (heartbeat_shutdown, heartbeat_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(heartbeat_task(config.heartbeat.clone(), heartbeat_rx));

    let app = router(store);

    // Run the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid address");

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    let _ = heartbeat_shutdown.send(true);
    let _ = heartbeat.await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received interrupt signal, stopping");
}
