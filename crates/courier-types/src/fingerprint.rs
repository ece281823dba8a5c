//! Content fingerprinting.

use sha2::{Digest, Sha256};

/// SHA-256 of the content, lowercase hex.
pub fn content_fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Incremental fingerprint for streamed bodies.
///
/// The receiver hashes chunks as they arrive so the declared fingerprint can
/// be verified without buffering the whole body twice.
#[derive(Default)]
pub struct StreamingFingerprint {
    hasher: Sha256,
    bytes: u64,
}

impl StreamingFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}
