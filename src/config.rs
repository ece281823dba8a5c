//! Configuration loading and validation.
//!
//! Both binaries read a single TOML file at startup, deserialize it into an
//! immutable [`Config`], validate it, and never re-read it mid-run. Every
//! component receives the piece of configuration it needs at construction.

use courier_watcher::{FilterRules, QUIET_PERIOD_MS, STABILITY_CHECK_INTERVAL_MS, STABILITY_MAX_WAIT_MS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("configuration item '{item}' {reason}")]
    Invalid { item: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(item: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            item,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Settings for the watching agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Directory tree to watch.
    #[serde(default = "default_watch")]
    pub watch: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Receiver base URL.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Debounce quiet period in milliseconds.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    /// Interval between the two size polls of the stability probe.
    #[serde(default = "default_stability_interval_ms")]
    pub stability_check_interval_ms: u64,
    #[serde(default = "default_stability_max_wait_ms")]
    pub stability_max_wait_ms: u64,
    /// Concurrent transfer workers.
    #[serde(default = "default_transfer_workers")]
    pub transfer_workers: usize,
    /// Capacity of the settled-change queue.
    #[serde(default = "default_queue_depth")]
    pub transfer_queue_depth: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    /// How long an acknowledged fingerprint suppresses re-uploads, seconds.
    #[serde(default = "default_uploaded_ttl_secs")]
    pub uploaded_cache_ttl_secs: u64,
    /// Grace period for in-flight transfers at shutdown, seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch: default_watch(),
            recursive: true,
            server_url: default_server_url(),
            quiet_period_ms: default_quiet_period_ms(),
            stability_check_interval_ms: default_stability_interval_ms(),
            stability_max_wait_ms: default_stability_max_wait_ms(),
            transfer_workers: default_transfer_workers(),
            transfer_queue_depth: default_queue_depth(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            uploaded_cache_ttl_secs: default_uploaded_ttl_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Path eligibility rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Allowed extensions with the leading dot, e.g. [".txt", ".log"].
    /// Empty allows everything.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Size window in megabytes.
    #[serde(default)]
    pub min_size_mb: f64,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: f64,
    /// Directory names excluded anywhere along the relative path.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            min_size_mb: 0.0,
            max_size_mb: default_max_size_mb(),
            exclude_dirs: Vec::new(),
            include_hidden: false,
        }
    }
}

/// Settings for the receiving service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Destination root the received tree is persisted under.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// Allowed extensions for stored files; empty allows everything.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Bounded wait for the per-path write lock, milliseconds.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            destination: default_destination(),
            allowed: Vec::new(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

/// Periodic alive logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub with_timestamp: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
            with_timestamp: true,
        }
    }
}

fn default_watch() -> PathBuf {
    PathBuf::from("cache")
}
fn default_true() -> bool {
    true
}
fn default_server_url() -> String {
    crate::DEFAULT_SERVER_URL.to_string()
}
fn default_quiet_period_ms() -> u64 {
    QUIET_PERIOD_MS
}
fn default_stability_interval_ms() -> u64 {
    STABILITY_CHECK_INTERVAL_MS
}
fn default_stability_max_wait_ms() -> u64 {
    STABILITY_MAX_WAIT_MS
}
fn default_transfer_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    64
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_initial_backoff_ms() -> u64 {
    200
}
fn default_retry_max_backoff_ms() -> u64 {
    5_000
}
fn default_uploaded_ttl_secs() -> u64 {
    300
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_max_size_mb() -> f64 {
    64.0
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    1500
}
fn default_destination() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_lock_wait_ms() -> u64 {
    2_000
}
fn default_heartbeat_interval_secs() -> u64 {
    3_600
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.min_size_mb < 0.0 {
            return Err(ConfigError::invalid(
                "filter.min_size_mb",
                "must be non-negative",
            ));
        }
        if self.filter.max_size_mb <= 0.0 {
            return Err(ConfigError::invalid(
                "filter.max_size_mb",
                "must be positive",
            ));
        }
        if self.filter.min_size_mb > self.filter.max_size_mb {
            return Err(ConfigError::invalid(
                "filter.min_size_mb",
                "must be less than or equal to 'filter.max_size_mb'",
            ));
        }
        if self.agent.transfer_workers == 0 {
            return Err(ConfigError::invalid(
                "agent.transfer_workers",
                "must be positive",
            ));
        }
        if self.agent.transfer_queue_depth == 0 {
            return Err(ConfigError::invalid(
                "agent.transfer_queue_depth",
                "must be positive",
            ));
        }
        if self.agent.retry_max_attempts == 0 {
            return Err(ConfigError::invalid(
                "agent.retry_max_attempts",
                "must be positive",
            ));
        }
        if self.agent.uploaded_cache_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "agent.uploaded_cache_ttl_secs",
                "must be positive",
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::invalid(
                "heartbeat.interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Filter rules for the watcher, sizes converted from MB to bytes.
    pub fn filter_rules(&self) -> FilterRules {
        FilterRules {
            allowed_extensions: self
                .filter
                .allowed
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            min_size_bytes: (self.filter.min_size_mb * 1024.0 * 1024.0) as u64,
            max_size_bytes: (self.filter.max_size_mb * 1024.0 * 1024.0) as u64,
            exclude_dirs: self.filter.exclude_dirs.clone(),
            include_hidden: self.filter.include_hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.agent.quiet_period_ms, 500);
        assert_eq!(config.server.port, 1500);
        assert!(config.filter.allowed.is_empty());
        assert!(config.heartbeat.with_timestamp);
    }

    #[test]
    fn test_parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            watch = "data"
            server_url = "http://10.0.0.5:1500"
            quiet_period_ms = 250
            transfer_workers = 8

            [filter]
            allowed = [".txt", ".log"]
            min_size_mb = 0.01
            max_size_mb = 1.0
            exclude_dirs = ["tmp"]

            [server]
            port = 8080
            destination = "incoming"

            [heartbeat]
            interval_secs = 60
            with_timestamp = false
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.agent.watch, PathBuf::from("data"));
        assert_eq!(config.agent.transfer_workers, 8);
        assert_eq!(config.filter.allowed, vec![".txt", ".log"]);
        assert_eq!(config.server.port, 8080);

        let rules = config.filter_rules();
        assert_eq!(rules.min_size_bytes, (0.01 * 1024.0 * 1024.0) as u64);
        assert_eq!(rules.max_size_bytes, 1024 * 1024);
    }

    #[test]
    fn test_rejects_inverted_size_window() {
        let config: Config = toml::from_str(
            r#"
            [filter]
            min_size_mb = 2.0
            max_size_mb = 1.0
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("filter.min_size_mb"));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            transfer_workers = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
