//! Configuration management for the finder
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides and sensible defaults. The resulting [`FederationConfig`] is the
//! one explicit value a [`crate::store::Store`] is built from.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Federation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FederationConfig {
    /// Local root directories, searched in order
    #[serde(default)]
    pub data_dirs: Vec<PathBuf>,

    /// Remote peers as `host[:port]`
    #[serde(default)]
    pub cluster_servers: Vec<String>,

    /// Backoff window after a peer failure, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Deadline for a peer find request, also the fan-out round budget
    #[serde(default = "default_find_timeout_ms")]
    pub find_timeout_ms: u64,

    /// Deadline for a peer fetch request
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// TTL of cached peer find results, in seconds
    #[serde(default = "default_find_cache_ttl_secs")]
    pub find_cache_ttl_secs: u64,

    /// Send peer requests as POST form bodies instead of GET query strings
    #[serde(default)]
    pub use_post: bool,

    /// Inbound request headers forwarded to peers
    #[serde(default)]
    pub forward_headers: Vec<String>,

    /// Consolidation function used when fetching from composite archives
    #[serde(default = "default_composite_cf")]
    pub composite_cf: String,

    /// Caching daemon address flushed before composite fetches
    #[serde(default)]
    pub flush_cached_daemon: Option<String>,

    /// Upper bound on concurrent peer workers in one fan-out round
    #[serde(default = "default_max_concurrent_finds")]
    pub max_concurrent_finds: usize,

    /// Capacity of the in-process find cache
    #[serde(default = "default_find_cache_entries")]
    pub find_cache_entries: usize,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_retry_delay_secs() -> u64 { 60 }
fn default_find_timeout_ms() -> u64 { 2_500 }
fn default_fetch_timeout_ms() -> u64 { 6_000 }
fn default_find_cache_ttl_secs() -> u64 { 300 }
fn default_composite_cf() -> String { "AVERAGE".to_string() }
fn default_max_concurrent_finds() -> usize { 32 }
fn default_find_cache_entries() -> usize { 10_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            cluster_servers: Vec::new(),
            retry_delay_secs: default_retry_delay_secs(),
            find_timeout_ms: default_find_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            find_cache_ttl_secs: default_find_cache_ttl_secs(),
            use_post: false,
            forward_headers: Vec::new(),
            composite_cf: default_composite_cf(),
            flush_cached_daemon: None,
            max_concurrent_finds: default_max_concurrent_finds(),
            find_cache_entries: default_find_cache_entries(),
            log_level: default_log_level(),
        }
    }
}

impl FederationConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path, e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path, e)))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// List values are comma separated.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dirs) = std::env::var("FINDER_DATA_DIRS") {
            self.data_dirs = split_list(&dirs).map(PathBuf::from).collect();
        }
        if let Ok(servers) = std::env::var("FINDER_CLUSTER_SERVERS") {
            self.cluster_servers = split_list(&servers).map(str::to_string).collect();
        }
        if let Ok(use_post) = std::env::var("FINDER_USE_POST") {
            if let Ok(v) = use_post.parse() {
                self.use_post = v;
            }
        }
        if let Ok(timeout) = std::env::var("FINDER_FIND_TIMEOUT_MS") {
            if let Ok(v) = timeout.parse() {
                self.find_timeout_ms = v;
            }
        }
        if let Ok(timeout) = std::env::var("FINDER_FETCH_TIMEOUT_MS") {
            if let Ok(v) = timeout.parse() {
                self.fetch_timeout_ms = v;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_dirs.is_empty() && self.cluster_servers.is_empty() {
            return Err(Error::Config(
                "data_dirs and cluster_servers cannot both be empty".to_string(),
            ));
        }
        if self.find_timeout_ms == 0 || self.fetch_timeout_ms == 0 {
            return Err(Error::Config("Peer timeouts must be > 0".to_string()));
        }
        if self.max_concurrent_finds == 0 {
            return Err(Error::Config("max_concurrent_finds must be > 0".to_string()));
        }
        if self.cluster_servers.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::Config("Cluster server entries cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config file {}: {}", path, e)))
    }

    /// Backoff window after a peer failure
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Peer find deadline and fan-out budget
    pub fn find_timeout(&self) -> Duration {
        Duration::from_millis(self.find_timeout_ms)
    }

    /// Peer fetch deadline
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// TTL of cached find results
    pub fn find_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.find_cache_ttl_secs)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
