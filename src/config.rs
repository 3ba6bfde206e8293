/*!
 * Configuration types for Orbit Mount
 */

use orbit_core_resilience::{BackoffStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MountError, Result};

/// Main configuration for a mount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Buffered reader tuning
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Retry behaviour for remote reads and seeks
    #[serde(default)]
    pub retry: RetrySettings,

    /// How long cached file attributes stay valid, in milliseconds
    #[serde(default = "default_attr_ttl_ms")]
    pub attr_ttl_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            retry: RetrySettings::default(),
            attr_ttl_ms: default_attr_ttl_ms(),
            log_level: LogLevel::Info,
            log_file: None,
        }
    }
}

impl MountConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MountConfig = toml::from_str(&contents)
            .map_err(|e| MountError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| MountError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the reader and retry policy cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.reader.read_chunk_size == 0 {
            return Err(MountError::Config("read_chunk_size must be > 0".into()));
        }
        if self.reader.max_retained_bytes < self.reader.read_chunk_size {
            return Err(MountError::Config(format!(
                "max_retained_bytes ({}) must be >= read_chunk_size ({})",
                self.reader.max_retained_bytes, self.reader.read_chunk_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(MountError::Config("retry.max_attempts must be > 0".into()));
        }
        Ok(())
    }

    /// Attribute cache lifetime
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }
}

/// Tunables of the buffered random-access reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Forward gaps larger than this are crossed with an explicit seek
    /// instead of reading through them
    #[serde(default = "default_seek_threshold")]
    pub seek_threshold: u64,

    /// Minimum size of each remote read request
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Retained buffer is trimmed from the front down to this size
    #[serde(default = "default_max_retained_bytes")]
    pub max_retained_bytes: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            seek_threshold: default_seek_threshold(),
            read_chunk_size: default_read_chunk_size(),
            max_retained_bytes: default_max_retained_bytes(),
        }
    }
}

/// Serializable form of the retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts per remote operation, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Give up retrying after this many seconds
    #[serde(default = "default_retry_time_limit")]
    pub time_limit_secs: u64,

    /// Delay after the first failure, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Use exponential backoff (otherwise fixed delay)
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,

    /// Jitter factor (0.0 disables jitter)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            time_limit_secs: default_retry_time_limit(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_backoff: true,
            jitter_factor: 0.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        let backoff = match (settings.exponential_backoff, settings.jitter_factor > 0.0) {
            (true, true) => BackoffStrategy::ExponentialWithJitter,
            (true, false) => BackoffStrategy::Exponential,
            (false, _) => BackoffStrategy::Fixed,
        };
        RetryConfig {
            max_attempts: settings.max_attempts,
            time_limit: Duration::from_secs(settings.time_limit_secs),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff,
            jitter_factor: settings.jitter_factor,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_seek_threshold() -> u64 {
    128 * 1024 // 128 KB
}

fn default_read_chunk_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_retained_bytes() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_attr_ttl_ms() -> u64 {
    1000
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_time_limit() -> u64 {
    300
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}
