//! The client-side transfer pipeline.
//!
//! Settled changes from the detector are drained by a bounded pool of
//! transfer workers; each delivery retries transient failures under an
//! explicit backoff policy and abandons attempts a newer change supersedes.

pub mod coordinator;
pub mod retry;
pub mod transfer;

pub use coordinator::Coordinator;
pub use retry::{RetryPolicy, RetryStep};
pub use transfer::{TransferClient, TransferOutcome};
