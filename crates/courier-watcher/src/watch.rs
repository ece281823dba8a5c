//! Bridge from the OS watch facility into a channel of [`ChangeEvent`]s.
//!
//! The watch facility is an unreliable external producer: events may be
//! coalesced, reordered, or duplicated. This task only maps raw notify events
//! into the domain vocabulary and forwards them; every delivery decision is
//! made downstream by the detector.

use courier_types::{ChangeEvent, ChangeKind};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watch `root` (recursively or not) and forward mapped events to `tx`.
///
/// Exits when the receiver is dropped. Watcher errors are logged and watching
/// continues; a watcher that cannot be created at all ends the task.
pub async fn watch_task(root: PathBuf, recursive: bool, tx: mpsc::Sender<ChangeEvent>) {
    let (notify_tx, mut notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(100);

    let mut watcher = match RecommendedWatcher::new(
        move |res| {
            let _ = notify_tx.blocking_send(res);
        },
        Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create filesystem watcher: {}", e);
            return;
        }
    };

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    if let Err(e) = watcher.watch(&root, mode) {
        error!("Failed to watch {}: {}", root.display(), e);
        return;
    }

    info!("Watching {}", root.display());

    while let Some(res) = notify_rx.recv().await {
        match res {
            Ok(event) => {
                for path in &event.paths {
                    let Some(kind) = map_event_kind(&event.kind, path) else {
                        continue;
                    };
                    debug!("Raw event {:?} for {}", kind, path.display());
                    if tx
                        .send(ChangeEvent {
                            path: path.clone(),
                            kind,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Filesystem watcher error: {}", e);
            }
        }
    }
}

/// Map a notify event kind to the domain vocabulary.
///
/// Renames become Removed (source) or Created (destination); when the
/// platform cannot tell the direction, path existence decides, as editors use
/// rename-into-place for atomic saves.
fn map_event_kind(kind: &EventKind, path: &std::path::Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(rename_mode)) => match rename_mode {
            RenameMode::From => Some(ChangeKind::Removed),
            RenameMode::To => Some(ChangeKind::Created),
            RenameMode::Both | RenameMode::Any | RenameMode::Other => {
                if path.exists() {
                    Some(ChangeKind::Created)
                } else {
                    Some(ChangeKind::Removed)
                }
            }
        },
        k if k.is_modify() => Some(ChangeKind::Modified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn recv_for_path(
        rx: &mut mpsc::Receiver<ChangeEvent>,
        path: &std::path::Path,
    ) -> ChangeEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for watch event")
                .expect("watch channel closed");
            if event.path == path {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_watch_task_reports_create_and_remove() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_task(dir.path().to_path_buf(), true, tx));

        // Give the watcher time to register
        tokio::time::sleep(Duration::from_millis(200)).await;

        let file = dir.path().join("observed.txt");
        fs::write(&file, b"hello").unwrap();
        let created = recv_for_path(&mut rx, &file).await;
        assert!(matches!(
            created.kind,
            ChangeKind::Created | ChangeKind::Modified
        ));

        fs::remove_file(&file).unwrap();
        loop {
            let event = recv_for_path(&mut rx, &file).await;
            if event.kind == ChangeKind::Removed {
                break;
            }
        }

        handle.abort();
    }
}
