//! Delivering one settled change to the receiver.

use crate::sync::retry::{RetryPolicy, RetryStep};
use courier_types::{
    content_fingerprint, DeliveryResponse, DeliveryStatus, StableChange, FINGERPRINT_HEADER,
    SEQUENCE_HEADER, SIZE_HEADER,
};
use courier_watcher::SequenceRegistry;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal result of a delivery, reported per StableChange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The receiver holds the content (stored now or already current).
    Acked(DeliveryStatus),
    /// A newer change for the same path made this attempt moot. Silent.
    Superseded,
    /// The source file vanished or changed under us. Not an error.
    Skipped(String),
    /// Retries exhausted or the receiver rejected the delivery.
    PermanentFailure(String),
}

enum AttemptError {
    /// Worth retrying: timeouts, connection failures, 5xx responses.
    Transient(String),
    /// Never retried: validation rejections and other 4xx responses.
    Permanent(String),
    /// The source file is gone or no longer matches the fingerprint.
    SourceGone(String),
}

/// URL for delivering a relative path, each segment encoded individually so
/// the `/` separators survive.
fn delivery_url(server: &str, relative_path: &str) -> String {
    let encoded = relative_path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/files/{}", server.trim_end_matches('/'), encoded)
}

/// Delivers settled changes over HTTP with bounded retries.
///
/// Owns nothing shared: the source file is only read, never mutated, and all
/// attempt state lives on this client's stack.
pub struct TransferClient {
    http: Client,
    server: String,
    policy: RetryPolicy,
    registry: SequenceRegistry,
}

impl TransferClient {
    pub fn new(
        server: String,
        request_timeout: Duration,
        policy: RetryPolicy,
        registry: SequenceRegistry,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            server,
            policy,
            registry,
        })
    }

    /// Deliver one settled change, retrying transient failures with backoff.
    ///
    /// Before the first attempt and before every retry the client checks
    /// whether a newer sequence exists for the path; if so the attempt is
    /// abandoned without reporting failure, because the newer attempt is
    /// authoritative.
    pub async fn deliver(&self, change: &StableChange) -> TransferOutcome {
        let url = delivery_url(&self.server, &change.relative_path);
        let mut failed_attempts = 0u32;

        loop {
            if self
                .registry
                .is_superseded(&change.relative_path, change.sequence)
                .await
            {
                debug!(
                    "Abandoning delivery of '{}' seq {}: superseded",
                    change.relative_path, change.sequence
                );
                return TransferOutcome::Superseded;
            }

            match self.attempt(&url, change).await {
                Ok(DeliveryStatus::Stale) => {
                    debug!(
                        "Receiver already has newer content for '{}' (seq {})",
                        change.relative_path, change.sequence
                    );
                    return TransferOutcome::Superseded;
                }
                Ok(status) => return TransferOutcome::Acked(status),
                Err(AttemptError::SourceGone(reason)) => {
                    debug!(
                        "Skipping delivery of '{}' seq {}: {}",
                        change.relative_path, change.sequence, reason
                    );
                    return TransferOutcome::Skipped(reason);
                }
                Err(AttemptError::Permanent(reason)) => {
                    return TransferOutcome::PermanentFailure(reason);
                }
                Err(AttemptError::Transient(reason)) => {
                    failed_attempts += 1;
                    match self.policy.after_failure(failed_attempts) {
                        RetryStep::RetryAfter(backoff) => {
                            warn!(
                                "Delivery of '{}' seq {} failed (attempt {}): {}; retrying in {:?}",
                                change.relative_path,
                                change.sequence,
                                failed_attempts,
                                reason,
                                backoff
                            );
                            tokio::time::sleep(backoff).await;
                        }
                        RetryStep::GiveUp => {
                            return TransferOutcome::PermanentFailure(format!(
                                "gave up after {} attempts: {}",
                                failed_attempts, reason
                            ));
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        change: &StableChange,
    ) -> Result<DeliveryStatus, AttemptError> {
        // Deleted or moved mid-flight is a cancelled change, not an error.
        let body = tokio::fs::read(&change.absolute_path)
            .await
            .map_err(|e| AttemptError::SourceGone(format!("could not read source: {}", e)))?;

        // The ack invariant is "byte-identical to the content the fingerprint
        // was computed over". If the file changed without the detector seeing
        // it yet, a newer change will follow; this one is void.
        if content_fingerprint(&body) != change.fingerprint {
            return Err(AttemptError::SourceGone(
                "content changed since detection".to_string(),
            ));
        }

        let response = self
            .http
            .post(url)
            .header(FINGERPRINT_HEADER, &change.fingerprint)
            .header(SIZE_HEADER, body.len().to_string())
            .header(SEQUENCE_HEADER, change.sequence.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let parsed: DeliveryResponse = response
                .json()
                .await
                .map_err(|e| AttemptError::Transient(format!("invalid response: {}", e)))?;
            return Ok(parsed.status);
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(AttemptError::Transient(format!("{} - {}", status, body_text)))
        } else {
            Err(AttemptError::Permanent(format!("{} - {}", status, body_text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_url_encodes_segments_not_separators() {
        assert_eq!(
            delivery_url("http://localhost:1500", "notes/today.txt"),
            "http://localhost:1500/files/notes/today.txt"
        );
        assert_eq!(
            delivery_url("http://localhost:1500/", "dir with space/a&b.txt"),
            "http://localhost:1500/files/dir%20with%20space/a%26b.txt"
        );
    }
}
