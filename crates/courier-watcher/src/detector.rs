//! The debouncing change detector.
//!
//! Converts the noisy stream of raw [`ChangeEvent`]s into settled
//! [`StableChange`]s, one per logically-complete edit. Each path runs an
//! independent state machine (`Idle -> Pending -> Stable -> Idle`) held in a
//! single arena keyed by relative path, so an event storm never allocates a
//! timer per event and one path's settling never delays another's.
//!
//! A path leaves Pending only after its quiet period elapses with no further
//! events AND its size is unchanged between two successive polls, which
//! guards against files still being written. The emitted change carries the
//! fingerprint computed at that instant and the next per-path sequence
//! number; later sequences supersede older in-flight attempts.

use crate::filter::PathFilter;
use courier_types::{content_fingerprint, ChangeEvent, ChangeKind, StableChange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// How long a path must stay quiet before it is considered settled.
    pub quiet_period: Duration,
    /// Interval between the two size polls of the stability probe.
    pub stability_check_interval: Duration,
    /// Upper bound on probing a file whose size keeps changing.
    pub stability_max_wait: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(crate::QUIET_PERIOD_MS),
            stability_check_interval: Duration::from_millis(crate::STABILITY_CHECK_INTERVAL_MS),
            stability_max_wait: Duration::from_millis(crate::STABILITY_MAX_WAIT_MS),
        }
    }
}

/// Per-path counters for one path's settle probes and emitted changes.
#[derive(Debug, Default)]
struct PathSequences {
    /// Epoch of the most recently started settle probe.
    begun: u64,
    /// Sequence of the most recently emitted StableChange.
    emitted: u64,
}

/// Shared per-path sequence counters.
///
/// A settle probe reserves an epoch when its quiet period expires; the
/// sequence number is only issued when the probe actually emits. A probe
/// that is cancelled (file vanished, size never settled) therefore never
/// advances the sequence, so it cannot supersede an in-flight older delivery
/// that no newer content ever replaced. The transfer side compares an
/// attempt's sequence against the latest emitted one. Shared across tasks,
/// so cloning is cheap and all clones see the same counters.
#[derive(Debug, Clone, Default)]
pub struct SequenceRegistry {
    inner: Arc<RwLock<HashMap<String, PathSequences>>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a settle probe for a path; returns its epoch.
    pub async fn begin_settle(&self, relative_path: &str) -> u64 {
        let mut map = self.inner.write().await;
        let entry = map.entry(relative_path.to_string()).or_default();
        entry.begun += 1;
        entry.begun
    }

    /// Issue the next sequence number for a path, unless a newer settle
    /// probe has begun since `epoch` (the newer probe's content wins).
    pub async fn try_emit(&self, relative_path: &str, epoch: u64) -> Option<u64> {
        let mut map = self.inner.write().await;
        let entry = map.entry(relative_path.to_string()).or_default();
        if entry.begun != epoch {
            return None;
        }
        entry.emitted += 1;
        Some(entry.emitted)
    }

    /// The latest emitted sequence number for a path (0 if none).
    pub async fn latest(&self, relative_path: &str) -> u64 {
        self.inner
            .read()
            .await
            .get(relative_path)
            .map(|entry| entry.emitted)
            .unwrap_or(0)
    }

    /// Whether a newer change has been emitted for this path.
    pub async fn is_superseded(&self, relative_path: &str, sequence: u64) -> bool {
        self.latest(relative_path).await > sequence
    }
}

struct PendingEntry {
    absolute: PathBuf,
    deadline: Instant,
}

/// Run the change detector until the event channel closes.
///
/// Raw events arrive on `rx`; settled changes are sent to `tx`. The stability
/// probe and fingerprint for a settling path run in a spawned task so the
/// detection loop keeps absorbing events for every other path meanwhile.
pub async fn detector_task(
    filter: PathFilter,
    config: DetectorConfig,
    registry: SequenceRegistry,
    mut rx: mpsc::Receiver<ChangeEvent>,
    tx: mpsc::Sender<StableChange>,
) {
    let mut pending: HashMap<String, PendingEntry> = HashMap::new();

    loop {
        let next_deadline = pending.values().map(|p| p.deadline).min();

        tokio::select! {
            biased;

            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        handle_event(&filter, &config, &mut pending, event);
                    }
                    None => break,
                }
            }

            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                let now = Instant::now();
                let due: Vec<String> = pending
                    .iter()
                    .filter(|(_, entry)| entry.deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for relative in due {
                    let entry = pending.remove(&relative).expect("due entry present");
                    let epoch = registry.begin_settle(&relative).await;
                    debug!("Path '{}' quiet period elapsed, probing", relative);
                    tokio::spawn(settle_and_emit(
                        relative,
                        entry.absolute,
                        epoch,
                        config.clone(),
                        registry.clone(),
                        tx.clone(),
                    ));
                }
            }
        }
    }

    debug!("Change detector stopping: event channel closed");
}

fn handle_event(
    filter: &PathFilter,
    config: &DetectorConfig,
    pending: &mut HashMap<String, PendingEntry>,
    event: ChangeEvent,
) {
    match event.kind {
        ChangeKind::Removed => {
            // A file deleted before settling is not transferred.
            if let Some(relative) = filter.relative_path(&event.path) {
                if pending.remove(&relative).is_some() {
                    debug!("Cancelled pending change for removed path '{}'", relative);
                }
            }
        }
        ChangeKind::Created | ChangeKind::Modified => {
            if !filter.eligible(&event.path) {
                return;
            }
            let Some(relative) = filter.relative_path(&event.path) else {
                return;
            };
            // Idle -> Pending, or Pending -> Pending with the timer restarted.
            pending.insert(
                relative,
                PendingEntry {
                    absolute: event.path,
                    deadline: Instant::now() + config.quiet_period,
                },
            );
        }
    }
}

async fn settle_and_emit(
    relative: String,
    absolute: PathBuf,
    epoch: u64,
    config: DetectorConfig,
    registry: SequenceRegistry,
    tx: mpsc::Sender<StableChange>,
) {
    let Some(_stable_size) = wait_for_size_stability(&absolute, &config).await else {
        debug!("Path '{}' never settled or vanished, cancelling", relative);
        return;
    };

    // Read errors here mean the file was deleted or moved mid-debounce:
    // a cancelled change, not an error.
    let content = match tokio::fs::read(&absolute).await {
        Ok(c) => c,
        Err(e) => {
            debug!("Could not read '{}' after settling: {}", relative, e);
            return;
        }
    };

    // The sequence is assigned only now, once the change is known to be
    // emittable; a cancelled probe must not make an in-flight older
    // delivery look superseded.
    let Some(sequence) = registry.try_emit(&relative, epoch).await else {
        debug!("Change for '{}' superseded before emission", relative);
        return;
    };

    let change = StableChange {
        fingerprint: content_fingerprint(&content),
        size_bytes: content.len() as u64,
        relative_path: relative,
        absolute_path: absolute,
        sequence,
        detected_at: std::time::Instant::now(),
    };
    debug!(
        "Stable change for '{}': seq {}, {} bytes",
        change.relative_path, change.sequence, change.size_bytes
    );
    let _ = tx.send(change).await;
}

/// Poll the file's size until it is unchanged across one
/// `stability_check_interval`, or give up after `stability_max_wait`.
///
/// Returns the stable size, or `None` if the file vanished or never settled.
async fn wait_for_size_stability(path: &Path, config: &DetectorConfig) -> Option<u64> {
    let start = Instant::now();
    let mut last_size = tokio::fs::metadata(path).await.ok()?.len();
    loop {
        tokio::time::sleep(config.stability_check_interval).await;
        let size = tokio::fs::metadata(path).await.ok()?.len();
        if size == last_size {
            return Some(size);
        }
        if start.elapsed() >= config.stability_max_wait {
            warn!(
                "Size of '{}' still changing after {:?}, giving up on this burst",
                path.display(),
                config.stability_max_wait
            );
            return None;
        }
        last_size = size;
    }
}
