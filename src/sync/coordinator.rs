//! Wiring for the agent pipeline.
//!
//! The coordinator owns every task on the sending side: the watch bridge, the
//! change detector, and the dispatcher that drains settled changes into a
//! bounded pool of transfer workers. It also owns shutdown: new work stops
//! immediately, in-flight transfers get a grace period.

use crate::config::Config;
use crate::sync::retry::RetryPolicy;
use crate::sync::transfer::{TransferClient, TransferOutcome};
use courier_types::StableChange;
use courier_watcher::{detector_task, watch_task, DetectorConfig, PathFilter, SequenceRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Recently acknowledged fingerprints, kept for a TTL so an event burst that
/// settles to identical content does not go over the wire again.
struct UploadedCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl UploadedCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn is_current(&self, relative_path: &str, fingerprint: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (_, recorded_at)| now.duration_since(*recorded_at) <= self.ttl);
        matches!(entries.get(relative_path), Some((fp, _)) if fp == fingerprint)
    }

    async fn record(&self, relative_path: &str, fingerprint: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            relative_path.to_string(),
            (fingerprint.to_string(), Instant::now()),
        );
    }
}

/// Handles to the running agent pipeline.
pub struct Coordinator {
    shutdown_tx: watch::Sender<bool>,
    watch_handle: JoinHandle<()>,
    detector_handle: JoinHandle<()>,
    dispatcher_handle: JoinHandle<()>,
    grace: Duration,
}

impl Coordinator {
    /// Spawn the pipeline: watch bridge -> detector -> dispatcher.
    pub fn start(config: &Config) -> Result<Self, reqwest::Error> {
        // Canonicalize so prefix-stripping agrees with the paths the watch
        // facility reports, which are resolved.
        let watch_root = config
            .agent
            .watch
            .canonicalize()
            .unwrap_or_else(|_| config.agent.watch.clone());

        let registry = SequenceRegistry::new();
        let filter = PathFilter::new(watch_root.clone(), config.filter_rules());
        let detector_config = DetectorConfig {
            quiet_period: Duration::from_millis(config.agent.quiet_period_ms),
            stability_check_interval: Duration::from_millis(
                config.agent.stability_check_interval_ms,
            ),
            stability_max_wait: Duration::from_millis(config.agent.stability_max_wait_ms),
        };
        let policy = RetryPolicy {
            max_attempts: config.agent.retry_max_attempts,
            initial_backoff: Duration::from_millis(config.agent.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.agent.retry_max_backoff_ms),
        };
        let client = TransferClient::new(
            config.agent.server_url.clone(),
            Duration::from_secs(config.agent.request_timeout_secs),
            policy,
            registry.clone(),
        )?;

        let (event_tx, event_rx) = mpsc::channel(100);
        // Bounded: a mass-edit burst backpressures the detector's emit tasks
        // instead of growing the queue without limit.
        let (change_tx, change_rx) = mpsc::channel(config.agent.transfer_queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watch_handle = tokio::spawn(watch_task(
            watch_root.clone(),
            config.agent.recursive,
            event_tx,
        ));
        let detector_handle = tokio::spawn(detector_task(
            filter,
            detector_config,
            registry,
            event_rx,
            change_tx,
        ));
        let dispatcher_handle = tokio::spawn(dispatch_task(
            Arc::new(client),
            change_rx,
            config.agent.transfer_workers,
            Arc::new(UploadedCache::new(Duration::from_secs(
                config.agent.uploaded_cache_ttl_secs,
            ))),
            shutdown_rx,
        ));

        info!(
            "Agent pipeline started: watching {}, delivering to {}",
            watch_root.display(),
            config.agent.server_url
        );

        Ok(Self {
            shutdown_tx,
            watch_handle,
            detector_handle,
            dispatcher_handle,
            grace: Duration::from_secs(config.agent.shutdown_grace_secs),
        })
    }

    /// Stop the pipeline. Pending debounce state is discarded (a restart will
    /// re-detect); in-flight transfers may finish within the grace period.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.watch_handle.abort();
        self.detector_handle.abort();

        let mut dispatcher = self.dispatcher_handle;
        if tokio::time::timeout(self.grace, &mut dispatcher).await.is_err() {
            warn!("In-flight transfers did not finish within grace period, aborting");
            dispatcher.abort();
        }
        info!("Agent pipeline stopped");
    }
}

/// Drain settled changes into at most `workers` concurrent deliveries.
async fn dispatch_task(
    client: Arc<TransferClient>,
    mut change_rx: mpsc::Receiver<StableChange>,
    workers: usize,
    cache: Arc<UploadedCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut deliveries = JoinSet::new();

    loop {
        // Reap finished deliveries so the set does not grow unbounded.
        while deliveries.try_join_next().is_some() {}

        tokio::select! {
            maybe_change = change_rx.recv() => {
                let Some(change) = maybe_change else { break };

                if cache
                    .is_current(&change.relative_path, &change.fingerprint)
                    .await
                {
                    debug!(
                        "File '{}' already acknowledged with this fingerprint, skipping",
                        change.relative_path
                    );
                    continue;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let client = client.clone();
                let cache = cache.clone();
                deliveries.spawn(async move {
                    let outcome = client.deliver(&change).await;
                    report_outcome(&change, &outcome);
                    if matches!(outcome, TransferOutcome::Acked(_)) {
                        cache.record(&change.relative_path, &change.fingerprint).await;
                    }
                    drop(permit);
                });
            }
            _ = shutdown.changed() => break,
        }
    }

    // Let in-flight deliveries run to completion; the coordinator bounds this
    // wait with the shutdown grace period.
    while deliveries.join_next().await.is_some() {}
}

/// One structured outcome event per StableChange, for the operator.
fn report_outcome(change: &StableChange, outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Acked(status) => info!(
            path = %change.relative_path,
            sequence = change.sequence,
            status = ?status,
            "delivery acked"
        ),
        TransferOutcome::Superseded => debug!(
            path = %change.relative_path,
            sequence = change.sequence,
            "delivery superseded by a newer change"
        ),
        TransferOutcome::Skipped(reason) => info!(
            path = %change.relative_path,
            sequence = change.sequence,
            reason = %reason,
            "delivery skipped"
        ),
        TransferOutcome::PermanentFailure(reason) => error!(
            path = %change.relative_path,
            sequence = change.sequence,
            reason = %reason,
            "delivery failed permanently"
        ),
    }
}
