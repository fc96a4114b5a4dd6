//! Configuration parsing and structures

use std::path::PathBuf;

use serde::Deserialize;

use crate::env::expand_env_refs;
use crate::naming::{BUCKET_PREFIX, VOLUME_PREFIX};

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugin socket settings
    #[serde(default)]
    pub plugin: RawPluginConfig,

    /// Volume layout
    #[serde(default)]
    pub volumes: RawVolumesConfig,

    /// minfs integration
    #[serde(default)]
    pub minfs: RawMinfsConfig,

    /// Connection defaults applied when a Create request omits them
    pub connection: Option<RawConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPluginConfig {
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawVolumesConfig {
    pub mount_root: Option<PathBuf>,
    pub volume_prefix: Option<String>,
    pub bucket_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMinfsConfig {
    pub config_path: Option<PathBuf>,
    pub version: Option<String>,
    pub mount_command: Option<String>,
    pub unmount_command: Option<String>,
}

/// All fields optional; each one fills the matching Create option when absent
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConnectionConfig {
    pub server: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub secure: Option<bool>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/miniovol.sock";
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/miniovol";
pub const DEFAULT_MINFS_CONFIG_PATH: &str = "/etc/minfs/config.json";
pub const DEFAULT_MINFS_VERSION: &str = "1";

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub plugin: PluginConfig,
    pub volumes: VolumesConfig,
    pub minfs: MinfsConfig,
    pub connection: ConnectionDefaults,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Unix socket Docker connects to
    pub socket_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VolumesConfig {
    /// Parent directory of every volume mountpoint
    pub mount_root: PathBuf,
    pub volume_prefix: String,
    pub bucket_prefix: String,
}

#[derive(Debug, Clone)]
pub struct MinfsConfig {
    /// Credentials descriptor read by the minfs mount helper
    pub config_path: PathBuf,
    pub version: String,
    pub mount_command: String,
    pub unmount_command: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionDefaults {
    pub server: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub secure: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default().resolve()
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by filling in defaults
    pub fn resolve(self) -> Config {
        let RawConfig {
            logging,
            plugin,
            volumes,
            minfs,
            connection,
        } = self;

        let connection = connection.unwrap_or_default();

        Config {
            logging,
            plugin: PluginConfig {
                socket_path: plugin
                    .socket_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
            },
            volumes: VolumesConfig {
                mount_root: volumes
                    .mount_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT_ROOT)),
                volume_prefix: volumes
                    .volume_prefix
                    .unwrap_or_else(|| VOLUME_PREFIX.to_string()),
                bucket_prefix: volumes
                    .bucket_prefix
                    .unwrap_or_else(|| BUCKET_PREFIX.to_string()),
            },
            minfs: MinfsConfig {
                config_path: minfs
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MINFS_CONFIG_PATH)),
                version: minfs
                    .version
                    .unwrap_or_else(|| DEFAULT_MINFS_VERSION.to_string()),
                mount_command: minfs.mount_command.unwrap_or_else(|| "mount".to_string()),
                unmount_command: minfs
                    .unmount_command
                    .unwrap_or_else(|| "umount".to_string()),
            },
            connection: ConnectionDefaults {
                server: non_empty(connection.server),
                access_key: non_empty(connection.access_key),
                secret_key: non_empty(connection.secret_key),
                secure: connection.secure,
            },
        }
    }
}

/// Treat `server: ""` (e.g. from an empty env fallback) as not configured
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, expanding `${VAR}` references first
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = expand_env_refs(content)?;
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(raw.resolve())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.volumes.mount_root.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "volumes.mount_root must be an absolute path: {:?}",
                self.volumes.mount_root
            )));
        }

        if !self.minfs.config_path.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "minfs.config_path must be an absolute path: {:?}",
                self.minfs.config_path
            )));
        }

        if self.plugin.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "plugin.socket_path cannot be empty".to_string(),
            ));
        }

        for (key, prefix) in [
            ("volumes.volume_prefix", &self.volumes.volume_prefix),
            ("volumes.bucket_prefix", &self.volumes.bucket_prefix),
        ] {
            if prefix.contains('/') {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot contain '/': {:?}",
                    key, prefix
                )));
            }
        }

        // S3 bucket names are lowercase; the generated suffix already is
        if self.volumes.bucket_prefix.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::ValidationError(format!(
                "volumes.bucket_prefix must be lowercase: {:?}",
                self.volumes.bucket_prefix
            )));
        }

        if self.minfs.mount_command.is_empty() || self.minfs.unmount_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "minfs mount and unmount commands cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
