use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Raw configuration file as written on disk.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub updates: UpdatesConfig,
    #[serde(default)]
    pub publish: PublishPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file_level: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file_level: None, file: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Capacity and expiry settings for the cache tiers.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of interned literal strings.
    #[serde(default = "default_intern_capacity")]
    pub intern_capacity: usize,
    /// Maximum number of memoized expression results.
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: usize,
    /// Maximum number of cached provider responses.
    #[serde(default = "default_external_capacity")]
    pub external_capacity: usize,
    /// Time-to-live for cached provider responses, in seconds.
    #[serde(default = "default_external_ttl_secs")]
    pub external_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            intern_capacity: default_intern_capacity(),
            memo_capacity: default_memo_capacity(),
            external_capacity: default_external_capacity(),
            external_ttl_secs: default_external_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn external_ttl(&self) -> Duration {
        Duration::from_secs(self.external_ttl_secs)
    }
}

fn default_intern_capacity() -> usize {
    4096
}

fn default_memo_capacity() -> usize {
    1024
}

fn default_external_capacity() -> usize {
    256
}

fn default_external_ttl_secs() -> u64 {
    900
}

/// Retry and timeout policy for the external logic provider.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_timeout_secs() -> u64 {
    60
}

/// Settings for the change propagation bus.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct UpdatesConfig {
    /// Window during which further changes are folded into the same cascade.
    #[serde(default)]
    pub debounce_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self { debounce_ms: 0, channel_capacity: default_channel_capacity() }
    }
}

impl UpdatesConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_channel_capacity() -> usize {
    256
}

/// Whether graph warnings block publishing a campaign.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PublishPolicy {
    #[serde(default)]
    pub block_on_warnings: bool,
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where the configuration was read from, if anywhere.
    pub source: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    pub updates: UpdatesConfig,
    pub publish: PublishPolicy,
}
