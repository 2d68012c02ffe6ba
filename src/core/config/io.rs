use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "CHATRELAY_CONFIG";
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const TELEGRAM_TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        /// Path to the configuration file with invalid TOML.
        path: PathBuf,
        /// The TOML deserialization error.
        source: toml::de::Error,
    },

    /// No configuration path was given and none could be derived.
    NoLocation,

    /// The file parsed but a required value is missing or out of range.
    Invalid(String),
}

impl ConfigError {
    fn display_path(path: &Path) -> String {
        path_display(path)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::NoLocation => write!(
                f,
                "Could not determine a config directory; pass --config or set {CONFIG_ENV_VAR}"
            ),
            ConfigError::Invalid(reason) => write!(f, "Invalid config: {reason}"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::NoLocation | ConfigError::Invalid(_) => None,
        }
    }
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Load, apply environment overrides and validate. Used once at startup.
    pub fn load_for_startup(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path().ok_or(ConfigError::NoLocation)?,
        };
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV_VAR).filter(|value| !value.trim().is_empty()) {
            self.api_key = key;
        }
        if let Some(token) = lookup(TELEGRAM_TOKEN_ENV_VAR).filter(|value| !value.trim().is_empty())
        {
            self.telegram_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram_token is required".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("api_key is required".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be between 0 and 2 (got {})",
                self.temperature
            )));
        }
        if let Some(proxy) = self.proxy_url() {
            url::Url::parse(proxy)
                .map_err(|err| ConfigError::Invalid(format!("proxy_url {proxy:?}: {err}")))?;
        }
        url::Url::parse(self.base_url())
            .map_err(|err| ConfigError::Invalid(format!("base_url: {err}")))?;
        Ok(())
    }

    pub(crate) fn get_config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            return Some(PathBuf::from(path));
        }
        ProjectDirs::from("org", "chatrelay", "chatrelay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
