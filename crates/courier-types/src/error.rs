//! Receiver-side error taxonomy.
//!
//! Each validation failure is a distinct variant so the HTTP layer can map
//! them to distinct statuses and the operator can tell them apart in logs.

use std::io;
use thiserror::Error;

/// Why a delivery was refused or failed to persist.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// The relative path escapes the destination root or is malformed.
    #[error("invalid path '{0}': resolves outside the destination root")]
    PathOutsideRoot(String),

    /// The path contains a component we refuse to store under.
    #[error("invalid path '{0}': {1}")]
    InvalidPath(String, String),

    /// The file extension is not in the receiver's allow list.
    #[error("extension '{0}' not allowed")]
    ExtensionNotAllowed(String),

    /// Body length did not match the declared size.
    #[error("size mismatch: declared {declared} bytes, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    /// Received bytes do not hash to the declared fingerprint.
    #[error("fingerprint mismatch: declared {declared}, computed {computed}")]
    FingerprintMismatch { declared: String, computed: String },

    /// Could not acquire the per-path write lock within the bounded wait.
    #[error("write for '{0}' timed out waiting for the path lock")]
    PathBusy(String),

    /// Destination write failed (disk full, permissions). The previously
    /// stored version is untouched.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ReceiveError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath(path.into(), reason.into())
    }

    /// Rejections whose data is suspect and must never be retried
    /// automatically.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PathOutsideRoot(_)
                | Self::InvalidPath(..)
                | Self::ExtensionNotAllowed(_)
                | Self::SizeMismatch { .. }
                | Self::FingerprintMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ReceiveError::SizeMismatch {
            declared: 1000,
            received: 400,
        };
        assert_eq!(err.to_string(), "size mismatch: declared 1000 bytes, received 400");
    }

    #[test]
    fn test_validation_split() {
        assert!(ReceiveError::PathOutsideRoot("../x".into()).is_validation());
        assert!(!ReceiveError::PathBusy("a.txt".into()).is_validation());
        let io_err: ReceiveError = io::Error::other("disk full").into();
        assert!(!io_err.is_validation());
    }
}
