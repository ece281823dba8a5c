//! Periodic alive logging.
//!
//! Both binaries run this task so an operator tailing the logs can tell a
//! quiet process from a dead one.

use crate::config::HeartbeatConfig;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Log an alive message every `interval_secs` until shutdown is signalled.
pub async fn heartbeat_task(config: HeartbeatConfig, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(config.interval_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if config.with_timestamp {
                    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                    info!("Heartbeat: status=alive timestamp={}", timestamp);
                } else {
                    info!("Heartbeat: status=alive");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
