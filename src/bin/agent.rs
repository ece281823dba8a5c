//! courier-agent - watch a directory tree and push settled changes.

use clap::Parser;
use filecourier::cli::AgentArgs;
use filecourier::config::Config;
use filecourier::heartbeat::heartbeat_task;
use filecourier::sync::Coordinator;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = AgentArgs::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };
    if let Some(server) = args.server {
        config.agent.server_url = server;
    }
    if let Some(watch_dir) = args.watch {
        config.agent.watch = watch_dir;
    }

    if !config.agent.watch.exists() {
        error!(
            "Monitoring path '{}' does not exist",
            config.agent.watch.display()
        );
        return ExitCode::from(1);
    }

    info!("Monitoring '{}'", config.agent.watch.display());

    let (heartbeat_shutdown, heartbeat_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(heartbeat_task(config.heartbeat.clone(), heartbeat_rx));

    let coordinator = match Coordinator::start(&config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("Failed to start the agent pipeline: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for interrupt signal: {}", e);
    }
    info!("Received interrupt signal, stopping");

    coordinator.shutdown().await;
    let _ = heartbeat_shutdown.send(true);
    let _ = heartbeat.await;

    info!("Bye");
    ExitCode::SUCCESS
}
