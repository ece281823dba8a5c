//! Change descriptions flowing from the watch facility to the transfer layer.

use std::path::PathBuf;
use std::time::Instant;

/// What the OS told us happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A raw filesystem notification. Ephemeral: produced by the watch bridge,
/// consumed immediately by the change detector.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A debounced, deduplicated unit of work: edits to this path have settled
/// and the content is ready to transfer.
///
/// The sequence number is per-path and monotonically increasing. A newer
/// sequence for the same path supersedes any older in-flight attempt; both
/// sender and receiver discard work that is not the latest sequence they have
/// seen for the path.
#[derive(Debug, Clone)]
pub struct StableChange {
    /// Path relative to the watched root, forward slashes.
    pub relative_path: String,
    /// Absolute path on the sending host, for reading the body.
    pub absolute_path: PathBuf,
    /// SHA-256 of the content at the moment the change settled.
    pub fingerprint: String,
    pub size_bytes: u64,
    pub sequence: u64,
    pub detected_at: Instant,
}
