//! Engine configuration: file format and loader.

pub mod loader;
pub mod types;

pub use loader::{ConfigError, ConfigLoader, default_config_path};
pub use types::{
    CacheConfig, ConfigFile, EngineConfig, LoggingConfig, ProviderConfig, PublishPolicy,
    UpdatesConfig,
};
