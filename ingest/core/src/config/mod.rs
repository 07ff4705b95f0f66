//! Stream and Engine Configuration
//!
//! Two layers of configuration:
//!
//! - [`StreamConfig`]: per-connection transport settings. Immutable for the
//!   duration of an attempt, replaceable between attempts (the adaptive
//!   optimizer proposes new ones).
//! - [`EngineConfig`]: engine-wide tunables (backoff base/cap, mandatory yield
//!   cadence, backpressure pause) plus the default `StreamConfig`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Per-call [`ConfigOverrides`] / CLI arguments
//! 2. Environment variables (`INGEST_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [stream]
//! buffer_size = 8192
//! flush_interval_ms = 100
//! compression_enabled = false
//! retry_attempts = 3
//! timeout_ms = 30000
//! backpressure_threshold = 1048576
//!
//! [engine]
//! backoff_base_ms = 1000
//! backoff_cap_ms = 10000
//! flush_every_chunks = 10
//! backpressure_pause_ms = 10
//! channel_capacity = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StreamError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Stream Configuration
// =============================================================================

/// Transport settings for a single connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Read buffer size hint sent to the endpoint (bytes)
    pub buffer_size: usize,

    /// Mandatory cooperative yield duration (milliseconds)
    pub flush_interval_ms: u64,

    /// Ask the endpoint for a compressed stream
    pub compression_enabled: bool,

    /// Retries after the first failed open (0 = single attempt)
    pub retry_attempts: u32,

    /// Bound on each individual open attempt (milliseconds)
    pub timeout_ms: u64,

    /// Bytes transferred beyond which the read loop pauses after each chunk
    pub backpressure_threshold: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            flush_interval_ms: 100,
            compression_enabled: false,
            retry_attempts: 3,
            timeout_ms: 30_000,
            backpressure_threshold: 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Per-attempt timeout as a `Duration`
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Mandatory yield interval as a `Duration`
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Check the numeric invariants
    ///
    /// Every numeric field must be non-zero except `retry_attempts`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), StreamError> {
        let zero_field = if self.buffer_size == 0 {
            Some("buffer_size")
        } else if self.flush_interval_ms == 0 {
            Some("flush_interval_ms")
        } else if self.timeout_ms == 0 {
            Some("timeout_ms")
        } else if self.backpressure_threshold == 0 {
            Some("backpressure_threshold")
        } else {
            None
        };

        match zero_field {
            Some(field) => Err(StreamError::InvalidConfig(format!(
                "{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

/// Partial `StreamConfig` applied on top of a base config
///
/// Passed to `StreamManager::create`; unset fields keep the engine default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    /// Buffer size override
    pub buffer_size: Option<usize>,
    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,
    /// Compression override
    pub compression_enabled: Option<bool>,
    /// Retry attempts override
    pub retry_attempts: Option<u32>,
    /// Per-attempt timeout override (milliseconds)
    pub timeout_ms: Option<u64>,
    /// Backpressure threshold override (bytes)
    pub backpressure_threshold: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set buffer size override
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = Some(bytes);
        self
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Set compression override
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = Some(enabled);
        self
    }

    /// Set retry attempts override
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Set per-attempt timeout override
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set backpressure threshold override
    #[must_use]
    pub fn with_backpressure_threshold(mut self, bytes: u64) -> Self {
        self.backpressure_threshold = Some(bytes);
        self
    }

    /// Whether any field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce a new config with these overrides applied to `base`
    #[must_use]
    pub fn apply_to(&self, base: &StreamConfig) -> StreamConfig {
        StreamConfig {
            buffer_size: self.buffer_size.unwrap_or(base.buffer_size),
            flush_interval_ms: self.flush_interval_ms.unwrap_or(base.flush_interval_ms),
            compression_enabled: self
                .compression_enabled
                .unwrap_or(base.compression_enabled),
            retry_attempts: self.retry_attempts.unwrap_or(base.retry_attempts),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            backpressure_threshold: self
                .backpressure_threshold
                .unwrap_or(base.backpressure_threshold),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Engine-wide tunables
///
/// The backoff cap and the yield cadence are defaults rather than values tuned
/// for any particular network profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Config used for every connection before overrides
    pub stream: StreamConfig,

    /// First backoff delay (milliseconds)
    pub backoff_base_ms: u64,

    /// Upper bound on any backoff delay (milliseconds)
    pub backoff_cap_ms: u64,

    /// Mandatory yield every N processed chunks
    pub flush_every_chunks: u64,

    /// Pause inserted after each chunk once over the backpressure threshold
    pub backpressure_pause_ms: u64,

    /// Capacity of each connection's event channel
    pub channel_capacity: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            backoff_base_ms: 1000,
            backoff_cap_ms: 10_000,
            flush_every_chunks: 10,
            backpressure_pause_ms: 10,
            channel_capacity: 100,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Apply CLI-level overrides to the default stream config
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if !overrides.is_empty() {
            self.stream = overrides.apply_to(&self.stream);
            self.source = ConfigSource::Cli;
        }
    }

    /// Check engine and default stream invariants
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for zero-valued tunables or an
    /// invalid default stream config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.backoff_base_ms == 0 || self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::ValidationError(format!(
                "backoff must satisfy 0 < base ({}) <= cap ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        if self.flush_every_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "flush_every_chunks must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Engine section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// First backoff delay in milliseconds
    pub backoff_base_ms: Option<u64>,

    /// Backoff cap in milliseconds
    pub backoff_cap_ms: Option<u64>,

    /// Mandatory yield cadence in chunks
    pub flush_every_chunks: Option<u64>,

    /// Backpressure pause in milliseconds
    pub backpressure_pause_ms: Option<u64>,

    /// Event channel capacity
    pub channel_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestToml {
    /// Default stream settings
    pub stream: ConfigOverrides,

    /// Engine tunables
    pub engine: EngineToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stream-ingest/ingest.toml` or
/// `~/.config/stream-ingest/ingest.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stream-ingest").join("ingest.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged result violates an invariant. A missing file is not an error.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: IngestToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut EngineConfig, toml: &IngestToml) {
    config.stream = toml.stream.apply_to(&config.stream);

    if let Some(base) = toml.engine.backoff_base_ms {
        config.backoff_base_ms = base;
    }
    if let Some(cap) = toml.engine.backoff_cap_ms {
        config.backoff_cap_ms = cap;
    }
    if let Some(every) = toml.engine.flush_every_chunks {
        config.flush_every_chunks = every;
    }
    if let Some(pause) = toml.engine.backpressure_pause_ms {
        config.backpressure_pause_ms = pause;
    }
    if let Some(capacity) = toml.engine.channel_capacity {
        config.channel_capacity = capacity;
    }
}

/// Apply `INGEST_*` environment overrides
///
/// `lookup` abstracts the environment so tests don't mutate process state.
fn apply_env_config<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
    ) -> Option<T> {
        lookup(key).and_then(|v| v.trim().parse().ok())
    }

    let mut touched = false;

    if let Some(v) = parsed(&lookup, "INGEST_BUFFER_SIZE") {
        config.stream.buffer_size = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_FLUSH_INTERVAL_MS") {
        config.stream.flush_interval_ms = v;
        touched = true;
    }
    if let Some(v) = lookup("INGEST_COMPRESSION") {
        config.stream.compression_enabled = v != "0" && v.to_lowercase() != "false";
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_RETRY_ATTEMPTS") {
        config.stream.retry_attempts = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_TIMEOUT_MS") {
        config.stream.timeout_ms = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_BACKPRESSURE_THRESHOLD") {
        config.stream.backpressure_threshold = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_BACKOFF_BASE_MS") {
        config.backoff_base_ms = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_BACKOFF_CAP_MS") {
        config.backoff_cap_ms = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_FLUSH_EVERY_CHUNKS") {
        config.flush_every_chunks = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_BACKPRESSURE_PAUSE_MS") {
        config.backpressure_pause_ms = v;
        touched = true;
    }
    if let Some(v) = parsed(&lookup, "INGEST_CHANNEL_CAPACITY") {
        config.channel_capacity = v;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.flush_interval_ms, 100);
        assert!(!config.compression_enabled);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.backpressure_threshold, 1_048_576);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_zero_retries() {
        let config = StreamConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_numeric_fields() {
        let cases = [
            ConfigOverrides::new().with_buffer_size(0),
            ConfigOverrides::new().with_flush_interval_ms(0),
            ConfigOverrides::new().with_timeout_ms(0),
            ConfigOverrides::new().with_backpressure_threshold(0),
        ];
        for overrides in cases {
            let config = overrides.apply_to(&StreamConfig::default());
            assert!(
                matches!(config.validate(), Err(StreamError::InvalidConfig(_))),
                "expected rejection for {overrides:?}"
            );
        }
    }

    #[test]
    fn test_overrides_apply_only_set_fields() {
        let base = StreamConfig::default();
        let config = ConfigOverrides::new()
            .with_buffer_size(4096)
            .with_compression(true)
            .apply_to(&base);

        assert_eq!(
            config,
            StreamConfig {
                buffer_size: 4096,
                compression_enabled: true,
                ..base
            }
        );
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = EngineConfig::default();
        config.apply_overrides(&ConfigOverrides::new());
        assert_eq!(config.source(), ConfigSource::Default);

        config.apply_overrides(&ConfigOverrides::new().with_retry_attempts(5));
        assert_eq!(config.source(), ConfigSource::Cli);
        assert_eq!(config.stream.retry_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/stream-ingest/ingest.toml")))
                .unwrap();
        assert!(config.config_file_path.is_none());
        assert_eq!(config.backoff_cap_ms, 10_000);
        assert_eq!(config.flush_every_chunks, 10);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[stream]
buffer_size = 2048
retry_attempts = 1

[engine]
backoff_cap_ms = 5000
flush_every_chunks = 4
"#
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.stream.buffer_size, 2048);
        assert_eq!(config.stream.retry_attempts, 1);
        assert_eq!(config.stream.timeout_ms, 30_000);
        assert_eq!(config.backoff_cap_ms, 5000);
        assert_eq!(config.flush_every_chunks, 4);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[stream\nbuffer_size = ").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\ntimeout_ms = 0").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = EngineConfig::default();
        apply_env_config(
            &mut config,
            env_of(&[
                ("INGEST_BUFFER_SIZE", "1024"),
                ("INGEST_COMPRESSION", "true"),
                ("INGEST_RETRY_ATTEMPTS", "not-a-number"),
            ]),
        );

        assert_eq!(config.stream.buffer_size, 1024);
        assert!(config.stream.compression_enabled);
        assert_eq!(config.stream.retry_attempts, 3);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_covers_engine_tunables() {
        let mut config = EngineConfig::default();
        apply_env_config(
            &mut config,
            env_of(&[
                ("INGEST_BACKOFF_BASE_MS", "250"),
                ("INGEST_BACKOFF_CAP_MS", "8000"),
                ("INGEST_FLUSH_EVERY_CHUNKS", "4"),
                ("INGEST_BACKPRESSURE_PAUSE_MS", "20"),
                ("INGEST_CHANNEL_CAPACITY", " 16 "),
            ]),
        );

        assert_eq!(config.backoff_base_ms, 250);
        assert_eq!(config.backoff_cap_ms, 8000);
        assert_eq!(config.flush_every_chunks, 4);
        assert_eq!(config.backpressure_pause_ms, 20);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.source(), ConfigSource::Env);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_compression_can_disable() {
        let mut config = EngineConfig::default();
        config.stream.compression_enabled = true;
        apply_env_config(&mut config, env_of(&[("INGEST_COMPRESSION", "false")]));
        assert!(!config.stream.compression_enabled);
    }

    #[test]
    fn test_env_without_matches_keeps_source() {
        let mut config = EngineConfig::default();
        apply_env_config(&mut config, env_of(&[("UNRELATED", "1")]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_engine_validate_backoff_ordering() {
        let config = EngineConfig {
            backoff_base_ms: 2000,
            backoff_cap_ms: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
