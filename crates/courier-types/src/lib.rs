//! Shared types for filecourier.
//!
//! This crate holds the pieces both sides of the wire agree on: change
//! descriptions, the delivery protocol types, content fingerprinting, and
//! receiver error taxonomy.

pub mod change;
pub mod error;
pub mod fingerprint;
pub mod wire;

pub use change::{ChangeEvent, ChangeKind, StableChange};
pub use error::ReceiveError;
pub use fingerprint::{content_fingerprint, StreamingFingerprint};
pub use wire::{
    DeliveryResponse, DeliveryStatus, FINGERPRINT_HEADER, SEQUENCE_HEADER, SIZE_HEADER,
};
