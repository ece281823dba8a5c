//! filecourier - one-way file synchronization.
//!
//! `courier-agent` watches a directory tree, debounces the raw event stream
//! into settled changes, and delivers each changed file to `courier-server`,
//! which validates it and atomically persists it under a destination root.

pub mod cli;
pub mod config;
pub mod heartbeat;
pub mod receiver;
pub mod sync;

/// Default receiver address.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:1500";
