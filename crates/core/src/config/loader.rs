use crate::config::types::{ConfigFile, EngineConfig, LoggingConfig};
use shellexpand::full;
use std::path::{Path, PathBuf};
use std::{env, fs};

use dirs::home_dir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(String),

    #[error("failed to read config file {0}: {1}")]
    ReadError(String, #[source] std::io::Error),

    #[error("failed to parse TOML in {0}: {1}")]
    ParseError(String, #[source] toml::de::Error),

    #[error("version {0} is unsupported (expected 1)")]
    BadVersion(u32),

    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("home directory not available to expand '~'")]
    NoHome,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the engine configuration.
    ///
    /// An explicit path must exist. Without one, the default location is tried
    /// and built-in defaults are used when nothing is there.
    pub fn load(config_path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let path = match config_path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.display().to_string()));
                }
                p.to_path_buf()
            }
            None => {
                let p = default_config_path();
                if !p.exists() {
                    tracing::debug!(path = %p.display(), "no config file, using defaults");
                    return Ok(EngineConfig::default());
                }
                p
            }
        };

        let s = fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e))?;

        Self::from_toml_str(&s, &path)
    }

    /// Parse and resolve configuration text; `origin` is only used in errors.
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<EngineConfig, ConfigError> {
        let cf: ConfigFile = toml::from_str(s)
            .map_err(|e| ConfigError::ParseError(origin.display().to_string(), e))?;

        if cf.version != 1 {
            return Err(ConfigError::BadVersion(cf.version));
        }

        if cf.provider.max_attempts == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "provider.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if cf.provider.base_delay_ms > cf.provider.max_delay_ms {
            return Err(ConfigError::InvalidSetting {
                key: "provider.base_delay_ms".into(),
                message: format!(
                    "{} exceeds provider.max_delay_ms ({})",
                    cf.provider.base_delay_ms, cf.provider.max_delay_ms
                ),
            });
        }
        for (key, value) in [
            ("cache.intern_capacity", cf.cache.intern_capacity),
            ("cache.memo_capacity", cf.cache.memo_capacity),
            ("cache.external_capacity", cf.cache.external_capacity),
            ("updates.channel_capacity", cf.updates.channel_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidSetting {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }

        let logging = Self::resolve_logging(&cf.logging)?;

        Ok(EngineConfig {
            source: Some(origin.to_path_buf()),
            logging,
            cache: cf.cache,
            provider: cf.provider,
            updates: cf.updates,
            publish: cf.publish,
        })
    }

    fn resolve_logging(log_cfg: &LoggingConfig) -> Result<LoggingConfig, ConfigError> {
        // Resolve log file path if present
        if let Some(ref file) = log_cfg.file {
            let expanded_file = expand_path(&file.to_string_lossy())?;
            Ok(LoggingConfig {
                level: log_cfg.level.clone(),
                file_level: log_cfg.file_level.clone(),
                file: Some(expanded_file),
            })
        } else {
            Ok(log_cfg.clone())
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("flowvars").join("config.toml");
    }
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("flowvars").join("config.toml")
}

fn expand_path(input: &str) -> Result<PathBuf, ConfigError> {
    let expanded = full(input).map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(expanded.to_string()))
}
