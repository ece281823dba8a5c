//! Path eligibility rules.
//!
//! The filter decides which paths under the watched root are worth debouncing
//! and transferring. It is a pure function of its rules apart from one
//! metadata read (file type and size).

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Eligibility rules, built once from configuration and immutable afterwards.
#[derive(Debug, Clone)]
pub struct FilterRules {
    /// Allowed file extensions, lowercased, with the leading dot
    /// (e.g. `".txt"`). Empty means every extension is allowed.
    pub allowed_extensions: Vec<String>,
    /// Inclusive size window in bytes.
    pub min_size_bytes: u64,
    pub max_size_bytes: u64,
    /// Directory names excluded anywhere along the relative path.
    pub exclude_dirs: Vec<String>,
    /// Whether dotfiles (and files under dot-directories) are eligible.
    pub include_hidden: bool,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            min_size_bytes: 0,
            max_size_bytes: u64::MAX,
            exclude_dirs: Vec::new(),
            include_hidden: false,
        }
    }
}

/// Decides whether a filesystem path is eligible for watching and transfer.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    rules: FilterRules,
}

impl PathFilter {
    pub fn new(root: PathBuf, rules: FilterRules) -> Self {
        Self { root, rules }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path relative to the watched root, with forward slashes.
    /// Returns `None` for paths outside the root.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let s = rel.to_string_lossy().replace('\\', "/");
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    /// Whether this path should enter the pipeline.
    ///
    /// Rejects paths outside the root, hidden components, excluded
    /// directories, disallowed extensions, anything that is not a regular
    /// file (symlinks, directories, sockets, devices), and files outside the
    /// configured size window.
    pub fn eligible(&self, path: &Path) -> bool {
        let Some(rel) = self.relative_path(path) else {
            return false;
        };

        for component in rel.split('/') {
            if !self.rules.include_hidden && component.starts_with('.') {
                debug!("Ignoring hidden component in '{}'", rel);
                return false;
            }
            if self.rules.exclude_dirs.iter().any(|d| d == component) {
                debug!("Ignoring excluded directory component in '{}'", rel);
                return false;
            }
        }

        if !self.extension_allowed(path) {
            debug!("File '{}' extension not allowed", rel);
            return false;
        }

        // symlink_metadata so a symlink is seen as a symlink, not its target.
        let meta = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) => {
                // Editors create and delete temp files faster than we can
                // stat them; a vanished path is simply not eligible.
                debug!("Could not stat '{}': {}", rel, e);
                return false;
            }
        };
        if !meta.file_type().is_file() {
            debug!("'{}' is not a regular file, skipping", rel);
            return false;
        }

        let size = meta.len();
        if size < self.rules.min_size_bytes || size > self.rules.max_size_bytes {
            warn!(
                "File '{}' size {} outside [{}, {}] bytes, skipping",
                rel, size, self.rules.min_size_bytes, self.rules.max_size_bytes
            );
            return false;
        }

        true
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.rules.allowed_extensions.is_empty() {
            return true;
        }
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
        match ext {
            Some(ext) => self.rules.allowed_extensions.iter().any(|a| *a == ext),
            None => false,
        }
    }
}
