//! The delivery protocol.
//!
//! A delivery is `POST /files/{path}` with the raw file bytes as the body and
//! three metadata headers. The response is a small JSON object carrying a
//! [`DeliveryStatus`]; validation failures come back as plain-text error
//! statuses instead.

use serde::{Deserialize, Serialize};

/// Header carrying the SHA-256 content fingerprint (lowercase hex).
pub const FINGERPRINT_HEADER: &str = "x-courier-fingerprint";
/// Header carrying the declared body size in bytes.
pub const SIZE_HEADER: &str = "x-courier-size";
/// Header carrying the sender's per-path sequence number.
pub const SEQUENCE_HEADER: &str = "x-courier-sequence";

/// Terminal state of an accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Body validated and atomically swapped into place.
    Stored,
    /// The receiver already holds this fingerprint at this path; no write.
    AlreadyCurrent,
    /// The receiver has already stored a newer sequence for this path.
    /// Not an error: the sender abandons the attempt silently.
    Stale,
}

/// Response body for an accepted delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub status: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_as_snake_case() {
        let json = serde_json::to_string(&DeliveryResponse {
            status: DeliveryStatus::AlreadyCurrent,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"already_current"}"#);

        let parsed: DeliveryResponse = serde_json::from_str(r#"{"status":"stale"}"#).unwrap();
        assert_eq!(parsed.status, DeliveryStatus::Stale);
    }
}
