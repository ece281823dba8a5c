//! Durable storage for delivered files.
//!
//! The destination tree itself is the durable state. Incoming bodies are
//! streamed to a temp file inside the tree and renamed into place only after
//! the full body is received and validated, so a concurrent reader or a
//! crash mid-transfer never observes a partially-written file. Writes to the
//! same relative path serialize behind a keyed lock; the freshness record it
//! guards keeps a late-arriving older sequence from overwriting a newer one.

use bytes::Bytes;
use courier_types::{
    content_fingerprint, DeliveryStatus, ReceiveError, StreamingFingerprint,
};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Metadata declared by the sender for one delivery.
#[derive(Debug, Clone)]
pub struct DeliveryMeta {
    pub fingerprint: String,
    pub size_bytes: u64,
    pub sequence: u64,
}

/// Last known state for one stored path. Guarded by the per-path lock.
#[derive(Default)]
struct PathRecord {
    /// Highest sequence stored (0 until the first delivery this run).
    sequence: u64,
    /// Fingerprint of the stored content; lazily seeded from disk so
    /// idempotence survives a receiver restart.
    fingerprint: Option<String>,
}

/// The receiver's destination tree plus per-path write discipline.
pub struct DestStore {
    root: PathBuf,
    /// Allowed extensions, lowercased with the leading dot; empty = all.
    allowed_extensions: Vec<String>,
    /// Bounded wait for the per-path lock.
    lock_wait: Duration,
    records: Mutex<HashMap<String, Arc<Mutex<PathRecord>>>>,
}

impl DestStore {
    pub fn new(
        root: PathBuf,
        allowed_extensions: Vec<String>,
        lock_wait: Duration,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self {
            root,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            lock_wait,
            records: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Accept one delivery: validate, stream, atomically replace.
    pub async fn store<S, E>(
        &self,
        relative_path: &str,
        meta: DeliveryMeta,
        body: S,
    ) -> Result<DeliveryStatus, ReceiveError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let target = self.resolve(relative_path)?;
        self.check_extension(relative_path)?;

        let slot = self.slot_for(relative_path).await;
        let mut record = tokio::time::timeout(self.lock_wait, slot.lock())
            .await
            .map_err(|_| ReceiveError::PathBusy(relative_path.to_string()))?;

        // First delivery for this path since startup: seed the record from
        // whatever the previous run left on disk.
        if record.fingerprint.is_none() {
            if let Ok(existing) = tokio::fs::read(&target).await {
                record.fingerprint = Some(content_fingerprint(&existing));
            }
        }

        if record.fingerprint.as_deref() == Some(meta.fingerprint.as_str()) {
            // Idempotent short-circuit: re-delivery of content we already
            // hold. The sequence floor still advances.
            if meta.sequence > record.sequence {
                record.sequence = meta.sequence;
            }
            debug!(
                "'{}' already current at fingerprint {}",
                relative_path, meta.fingerprint
            );
            return Ok(DeliveryStatus::AlreadyCurrent);
        }

        if meta.sequence <= record.sequence {
            // Network reordering delivered an older version late. Freshness
            // is decided by the sender's sequence, not arrival order.
            debug!(
                "'{}' delivery seq {} is stale (newest stored {})",
                relative_path, meta.sequence, record.sequence
            );
            return Ok(DeliveryStatus::Stale);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_path_for(&target, meta.sequence);
        match write_body(&temp_path, &meta, body).await {
            Ok(()) => {}
            Err(e) => {
                // The previously stored version is untouched.
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &target).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        record.sequence = meta.sequence;
        record.fingerprint = Some(meta.fingerprint.clone());
        info!(
            "Stored '{}' seq {} ({} bytes)",
            relative_path, meta.sequence, meta.size_bytes
        );
        Ok(DeliveryStatus::Stored)
    }

    /// Resolve a relative path strictly inside the destination root.
    ///
    /// Absolute paths and any `..` component are rejected outright rather
    /// than resolved, so nothing outside the root can even be named.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, ReceiveError> {
        if relative_path.is_empty() {
            return Err(ReceiveError::invalid_path(relative_path, "empty path"));
        }
        let mut clean = PathBuf::new();
        for component in Path::new(relative_path).components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ReceiveError::PathOutsideRoot(relative_path.to_string()));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(ReceiveError::invalid_path(
                relative_path,
                "no usable path components",
            ));
        }
        Ok(self.root.join(clean))
    }

    fn check_extension(&self, relative_path: &str) -> Result<(), ReceiveError> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        let ext = Path::new(relative_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if self.allowed_extensions.iter().any(|a| *a == ext) {
            Ok(())
        } else {
            Err(ReceiveError::ExtensionNotAllowed(ext))
        }
    }

    async fn slot_for(&self, relative_path: &str) -> Arc<Mutex<PathRecord>> {
        let mut records = self.records.lock().await;
        records
            .entry(relative_path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PathRecord::default())))
            .clone()
    }
}

fn temp_path_for(target: &Path, sequence: u64) -> PathBuf {
    let name = target.file_name().unwrap_or_default().to_string_lossy();
    let temp_name = format!(".{}.tmp.{}.{}", name, std::process::id(), sequence);
    match target.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// Stream the body into the temp file, enforcing the declared size and
/// fingerprint, and flush it to disk before returning.
async fn write_body<S, E>(
    temp_path: &Path,
    meta: &DeliveryMeta,
    mut body: S,
) -> Result<(), ReceiveError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(temp_path).await?;
    let mut digest = StreamingFingerprint::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            ReceiveError::Io(std::io::Error::other(format!("body stream failed: {}", e)))
        })?;
        digest.update(&chunk);
        if digest.bytes_seen() > meta.size_bytes {
            return Err(ReceiveError::SizeMismatch {
                declared: meta.size_bytes,
                received: digest.bytes_seen(),
            });
        }
        file.write_all(&chunk).await?;
    }

    if digest.bytes_seen() != meta.size_bytes {
        return Err(ReceiveError::SizeMismatch {
            declared: meta.size_bytes,
            received: digest.bytes_seen(),
        });
    }

    let computed = digest.finish();
    if computed != meta.fingerprint {
        return Err(ReceiveError::FingerprintMismatch {
            declared: meta.fingerprint.clone(),
            computed,
        });
    }

    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> DestStore {
        DestStore::new(
            dir.path().to_path_buf(),
            Vec::new(),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    fn meta_for(content: &[u8], sequence: u64) -> DeliveryMeta {
        DeliveryMeta {
            fingerprint: content_fingerprint(content),
            size_bytes: content.len() as u64,
            sequence,
        }
    }

    fn body_of(content: &'static [u8]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(vec![Ok(Bytes::from_static(content))])
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal_and_absolute() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.resolve("../../etc/passwd"),
            Err(ReceiveError::PathOutsideRoot(_))
        ));
        assert!(matches!(
            store.resolve("a/../../b.txt"),
            Err(ReceiveError::PathOutsideRoot(_))
        ));
        assert!(matches!(
            store.resolve("/etc/passwd"),
            Err(ReceiveError::PathOutsideRoot(_))
        ));
        assert!(matches!(
            store.resolve(""),
            Err(ReceiveError::InvalidPath(..))
        ));
        assert!(matches!(
            store.resolve("./."),
            Err(ReceiveError::InvalidPath(..))
        ));

        let ok = store.resolve("nested/dir/file.txt").unwrap();
        assert!(ok.starts_with(store.root()));
    }

    #[tokio::test]
    async fn test_store_then_idempotent_redelivery() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let content: &[u8] = b"hello";

        let status = store
            .store("a.txt", meta_for(content, 1), body_of(content))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Stored);
        assert_eq!(std::fs::read(store.root().join("a.txt")).unwrap(), content);

        let status = store
            .store("a.txt", meta_for(content, 1), body_of(content))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::AlreadyCurrent);
    }

    #[tokio::test]
    async fn test_stale_sequence_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let newer: &[u8] = b"newer content";
        let older: &[u8] = b"older content";

        store
            .store("p.txt", meta_for(newer, 2), body_of(newer))
            .await
            .unwrap();
        let status = store
            .store("p.txt", meta_for(older, 1), body_of(older))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Stale);
        assert_eq!(std::fs::read(store.root().join("p.txt")).unwrap(), newer);
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_previous_version() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let original: &[u8] = b"original";

        store
            .store("t.txt", meta_for(original, 1), body_of(original))
            .await
            .unwrap();

        // Declares 1000 bytes but the stream ends after 400.
        let partial = Bytes::from(vec![7u8; 400]);
        let meta = DeliveryMeta {
            fingerprint: "deadbeef".to_string(),
            size_bytes: 1000,
            sequence: 2,
        };
        let body =
            futures::stream::iter(vec![Ok::<_, std::io::Error>(partial)]);
        let err = store
            .store("t.txt", meta, Box::pin(body))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::SizeMismatch {
                declared: 1000,
                received: 400
            }
        ));

        // Previous version intact, no temp litter.
        assert_eq!(std::fs::read(store.root().join("t.txt")).unwrap(), original);
        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let content: &[u8] = b"payload";
        let meta = DeliveryMeta {
            fingerprint: content_fingerprint(b"different"),
            size_bytes: content.len() as u64,
            sequence: 1,
        };
        let err = store.store("f.txt", meta, body_of(content)).await.unwrap_err();
        assert!(matches!(err, ReceiveError::FingerprintMismatch { .. }));
        assert!(!store.root().join("f.txt").exists());
    }

    #[tokio::test]
    async fn test_extension_allow_list() {
        let dir = TempDir::new().unwrap();
        let store = DestStore::new(
            dir.path().to_path_buf(),
            vec![".txt".to_string()],
            Duration::from_millis(500),
        )
        .unwrap();
        let content: &[u8] = b"x";

        store
            .store("ok.txt", meta_for(content, 1), body_of(content))
            .await
            .unwrap();
        let err = store
            .store("no.bin", meta_for(content, 1), body_of(content))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::ExtensionNotAllowed(_)));
    }

    #[tokio::test]
    async fn test_idempotence_survives_restart() {
        let dir = TempDir::new().unwrap();
        let content: &[u8] = b"persisted";
        {
            let store = store_in(&dir);
            store
                .store("keep.txt", meta_for(content, 3), body_of(content))
                .await
                .unwrap();
        }
        // New store instance: freshness map empty, tree intact.
        let store = store_in(&dir);
        let status = store
            .store("keep.txt", meta_for(content, 1), body_of(content))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::AlreadyCurrent);
    }
}
