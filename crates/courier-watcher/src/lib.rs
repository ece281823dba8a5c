//! Filesystem watching for filecourier.
//!
//! This crate provides the client-side front half of the pipeline: path
//! eligibility rules, the bridge from the OS watch facility into a channel of
//! [`courier_types::ChangeEvent`]s, and the debouncing change detector that
//! turns event bursts into settled [`courier_types::StableChange`]s.

pub mod detector;
pub mod filter;
pub mod watch;

pub use detector::{detector_task, DetectorConfig, SequenceRegistry};
pub use filter::{FilterRules, PathFilter};
pub use watch::watch_task;

/// Default debounce quiet period (ms).
pub const QUIET_PERIOD_MS: u64 = 500;

/// Default interval between the two size polls of the stability probe (ms).
pub const STABILITY_CHECK_INTERVAL_MS: u64 = 100;

/// Default upper bound on how long the stability probe keeps polling a file
/// whose size will not settle (ms).
pub const STABILITY_MAX_WAIT_MS: u64 = 5_000;
