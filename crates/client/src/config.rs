//! Client configuration via `shardline.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Policy names are validated eagerly when a file is loaded.

use serde::{Deserialize, Serialize};
use shardline_core::{Consistency, Durability, Error, Result};
use shardline_protocol::SerialVersion;
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "shardline.toml";

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_read_consistency() -> String {
    "none_required".to_string()
}

fn default_write_durability() -> String {
    "commit_no_sync".to_string()
}

// ============================================================================
// Retry
// ============================================================================

/// Bounded retry of transient faults
///
/// A retry happens only while the call's deadline leaves more than
/// `min_remaining_ms`; each retry first sleeps `retry_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: usize,
    /// Fixed delay before each retry in milliseconds
    pub retry_delay_ms: u64,
    /// Budget that must remain for a retry to be attempted
    pub min_remaining_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 10,
            min_remaining_ms: 10,
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before each retry
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the budget a retry needs
    pub fn with_min_remaining_ms(mut self, min_remaining_ms: u64) -> Self {
        self.min_remaining_ms = min_remaining_ms;
        self
    }

    /// Delay before each retry
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Budget a retry needs
    pub fn min_remaining(&self) -> Duration {
        Duration::from_millis(self.min_remaining_ms)
    }
}

// ============================================================================
// Request limits
// ============================================================================

/// Per-node request limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimitsConfig {
    /// In-flight requests per node before it counts as busy
    pub max_active_requests: usize,
}

impl Default for RequestLimitsConfig {
    fn default() -> Self {
        Self {
            max_active_requests: 100,
        }
    }
}

// ============================================================================
// Iteration
// ============================================================================

/// Scan tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    /// Records per batch
    pub batch_size: u32,
    /// Scan workers for parallel scans; 0 derives one per shard
    pub max_concurrent_requests: usize,
    /// Batches buffered between workers and the caller; 0 derives from
    /// the worker count
    pub max_results_batches: usize,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent_requests: 0,
            max_results_batches: 0,
        }
    }
}

impl IterationConfig {
    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the worker limit
    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n;
        self
    }

    /// Set the result buffer size
    pub fn with_max_results_batches(mut self, n: usize) -> Self {
        self.max_results_batches = n;
        self
    }

    /// Worker count for a scan over `shards` shards
    pub fn workers_for(&self, shards: usize) -> usize {
        let shards = shards.max(1);
        match self.max_concurrent_requests {
            0 => shards,
            n => n.min(shards),
        }
    }

    /// Result buffer size for `workers` workers
    pub fn results_buffer_for(&self, workers: usize) -> usize {
        match self.max_results_batches {
            0 => workers.max(1) * 2,
            n => n,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client configuration loaded from `shardline.toml`.
///
/// # Example
///
/// ```toml
/// request_timeout_ms = 5000
/// read_consistency = "none_required"
/// write_durability = "commit_no_sync"
///
/// [retry]
/// max_retries = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default per-call timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Default read consistency: `"none_required"`, `"absolute"` or
    /// `"none_required_no_master"`
    #[serde(default = "default_read_consistency")]
    pub read_consistency: String,
    /// Default write durability: `"commit_sync"`, `"commit_no_sync"` or
    /// `"commit_write_no_sync"`
    #[serde(default = "default_write_durability")]
    pub write_durability: String,
    /// Retry of transient faults
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-node limits
    #[serde(default)]
    pub request_limits: RequestLimitsConfig,
    /// Scan tuning
    #[serde(default)]
    pub iteration: IterationConfig,
    /// Pin the wire protocol to at most this serial version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_serial_version: Option<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            read_consistency: default_read_consistency(),
            write_durability: default_write_durability(),
            retry: RetryConfig::default(),
            request_limits: RequestLimitsConfig::default(),
            iteration: IterationConfig::default(),
            max_serial_version: None,
        }
    }
}

impl ClientConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Shardline client configuration
#
# Default timeout of every call, in milliseconds. Retries share this budget.
request_timeout_ms = 5000

# Read consistency: "none_required" (default), "absolute" or
# "none_required_no_master"
read_consistency = "none_required"

# Write durability: "commit_sync", "commit_no_sync" (default) or
# "commit_write_no_sync"
write_durability = "commit_no_sync"

# Pin the wire protocol version (default: newest supported)
# max_serial_version = 1

[retry]
max_retries = 2
retry_delay_ms = 10
min_remaining_ms = 10

[request_limits]
max_active_requests = 100

[iteration]
batch_size = 100
# 0 = one worker per shard
max_concurrent_requests = 0
# 0 = twice the worker count
max_results_batches = 0
"#
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or names an
    /// unknown policy.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config { reason } => {
                Error::config(format!("{} ({})", reason, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Check every named policy and bound
    pub fn validate(&self) -> Result<()> {
        self.consistency()?;
        self.durability()?;
        self.serial_version()?;
        if self.request_timeout_ms == 0 {
            return Err(Error::config("request_timeout_ms must be positive"));
        }
        if self.iteration.batch_size == 0 {
            return Err(Error::config("iteration.batch_size must be positive"));
        }
        Ok(())
    }

    /// Default read consistency
    pub fn consistency(&self) -> Result<Consistency> {
        Consistency::from_name(&self.read_consistency).ok_or_else(|| {
            Error::config(format!(
                "Invalid read_consistency '{}'. Expected \"none_required\", \"absolute\" \
                 or \"none_required_no_master\".",
                self.read_consistency
            ))
        })
    }

    /// Default write durability
    pub fn durability(&self) -> Result<Durability> {
        Durability::from_name(&self.write_durability).ok_or_else(|| {
            Error::config(format!(
                "Invalid write_durability '{}'. Expected \"commit_sync\", \"commit_no_sync\" \
                 or \"commit_write_no_sync\".",
                self.write_durability
            ))
        })
    }

    /// Highest serial version the client will speak
    pub fn serial_version(&self) -> Result<SerialVersion> {
        match self.max_serial_version {
            None => Ok(SerialVersion::CURRENT),
            Some(raw) => SerialVersion::new(raw)
                .map_err(|e| Error::config(format!("Invalid max_serial_version: {}", e))),
        }
    }

    /// Default per-call timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the default per-call timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the default read consistency by name
    pub fn with_read_consistency(mut self, name: impl Into<String>) -> Self {
        self.read_consistency = name.into();
        self
    }

    /// Set the default write durability by name
    pub fn with_write_durability(mut self, name: impl Into<String>) -> Self {
        self.write_durability = name.into();
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-node in-flight limit
    pub fn with_max_active_requests(mut self, n: usize) -> Self {
        self.request_limits.max_active_requests = n;
        self
    }

    /// Set scan tuning
    pub fn with_iteration(mut self, iteration: IterationConfig) -> Self {
        self.iteration = iteration;
        self
    }

    /// Pin the wire protocol version
    pub fn with_max_serial_version(mut self, version: SerialVersion) -> Self {
        self.max_serial_version = Some(version.get());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.consistency().unwrap(), Consistency::NoneRequired);
        assert_eq!(config.durability().unwrap(), Durability::COMMIT_NO_SYNC);
        assert_eq!(config.serial_version().unwrap(), SerialVersion::CURRENT);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn default_toml_matches_default() {
        let parsed = ClientConfig::from_toml_str(ClientConfig::default_toml()).unwrap();
        assert_eq!(parsed, ClientConfig::default());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let parsed = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(parsed, ClientConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let parsed = ClientConfig::from_toml_str("[retry]\nmax_retries = 5\n").unwrap();
        assert_eq!(parsed.retry.max_retries, 5);
        assert_eq!(parsed.retry.retry_delay_ms, 10);
        assert_eq!(parsed.iteration.batch_size, 100);
    }

    #[test]
    fn invalid_policy_names_rejected() {
        let err = ClientConfig::from_toml_str("read_consistency = \"eventual\"").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(ClientConfig::from_toml_str("write_durability = \"fsync\"").is_err());
        assert!(ClientConfig::from_toml_str("max_serial_version = 9").is_err());
        assert!(ClientConfig::from_toml_str("request_timeout_ms = 0").is_err());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = ClientConfig::from_toml_str("request_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        ClientConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ClientConfig::from_file(&path).unwrap(), ClientConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "read_consistency = \"absolute\"\n").unwrap();
        ClientConfig::write_default_if_missing(&path).unwrap();
        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.consistency().unwrap(), Consistency::Absolute);
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ClientConfig::default()
            .with_request_timeout(Duration::from_millis(750))
            .with_write_durability("commit_sync")
            .with_retry(RetryConfig::no_retry())
            .with_max_serial_version(SerialVersion::V1);
        config.write_to_file(&path).unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = ClientConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn iteration_derivations() {
        let it = IterationConfig::default();
        assert_eq!(it.workers_for(4), 4);
        assert_eq!(it.results_buffer_for(4), 8);
        let it = it.with_max_concurrent_requests(2).with_max_results_batches(3);
        assert_eq!(it.workers_for(4), 2);
        assert_eq!(it.workers_for(1), 1);
        assert_eq!(it.results_buffer_for(2), 3);
    }
}
