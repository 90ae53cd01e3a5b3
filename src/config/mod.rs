//! Bridge configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `NANOCLAW_*` environment variables, each layer overriding the previous.

use crate::ipc::WatcherConfig;
use crate::subprocess::streaming::SessionLimits;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;


pub const ENV_DATA_DIR: &str = "NANOCLAW_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "NANOCLAW_LOG_LEVEL";
pub const ENV_IPC_POLL_INTERVAL_MS: &str = "NANOCLAW_IPC_POLL_INTERVAL_MS";
pub const ENV_IDLE_TIMEOUT_MS: &str = "NANOCLAW_IDLE_TIMEOUT_MS";
pub const ENV_CONTAINER_TIMEOUT_MS: &str = "NANOCLAW_CONTAINER_TIMEOUT_MS";
pub const ENV_MAX_OUTPUT_SIZE: &str = "NANOCLAW_MAX_OUTPUT_SIZE";
pub const ENV_MAIN_GROUP: &str = "NANOCLAW_MAIN_GROUP";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Platform data directory, falling back to `./data`
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "nanoclaw", "nanoclaw")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// `config.toml` in the platform config directory, if one can be determined
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "nanoclaw", "nanoclaw")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub data_dir: PathBuf,
    pub log_level: Option<String>,
    /// Group folder granted the main-group privilege hint
    pub main_group: String,
    pub ipc: IpcSettings,
    pub container: ContainerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcSettings {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    pub max_output_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: None,
            main_group: "main".to_string(),
            ipc: IpcSettings::default(),
            container: ContainerSettings::default(),
        }
    }
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl Default for ContainerSettings {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            timeout: limits.container_timeout,
            idle_timeout: limits.idle_timeout,
            max_output_size: limits.max_output_size,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `path` (or the default location) plus the
    /// process environment
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.merge_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `NANOCLAW_*` overrides using `lookup` to read variables
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = Some(level);
        }

        if let Some(group) = lookup(ENV_MAIN_GROUP) {
            self.main_group = group;
        }

        if let Some(value) = lookup(ENV_IPC_POLL_INTERVAL_MS) {
            self.ipc.poll_interval = parse_millis(ENV_IPC_POLL_INTERVAL_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_IDLE_TIMEOUT_MS) {
            self.container.idle_timeout = parse_millis(ENV_IDLE_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_CONTAINER_TIMEOUT_MS) {
            self.container.timeout = parse_millis(ENV_CONTAINER_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_MAX_OUTPUT_SIZE) {
            self.container.max_output_size =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
                        var: ENV_MAX_OUTPUT_SIZE,
                        value: value.clone(),
                        reason: e.to_string(),
                    })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ipc.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "ipc.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.container.max_output_size == 0 {
            return Err(ConfigError::Invalid(
                "container.max_output_size must be greater than zero".to_string(),
            ));
        }
        if self.main_group.is_empty()
            || self.main_group.contains(['/', '\\'])
            || self.main_group == crate::ipc::ERRORS_DIR
        {
            return Err(ConfigError::Invalid(format!(
                "main_group {:?} is not a valid group folder name",
                self.main_group
            )));
        }
        Ok(())
    }

    /// Root of the per-group IPC drop directories
    pub fn ipc_base_dir(&self) -> PathBuf {
        self.data_dir.join("ipc")
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            base_dir: self.ipc_base_dir(),
            poll_interval: self.ipc.poll_interval,
            main_group: self.main_group.clone(),
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            container_timeout: self.container.timeout,
            idle_timeout: self.container.idle_timeout,
            max_output_size: self.container.max_output_size,
            ..SessionLimits::default()
        }
    }
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
