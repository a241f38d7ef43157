//! Client configuration persisted as `config.toml` in the app directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize, de::Error as SerdeDeError};
use thiserror::Error;
use url::Url;

use crate::app_dirs;

/// Default filename used to store the client configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable that overrides `server.base_url` for one run.
pub const BASE_URL_ENV: &str = "MODELDESK_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Aggregate client settings loaded from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub encoding: EncodingSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Location of the model management service.
///
/// Config keys: `base_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Transport limits applied to every request.
///
/// Config keys: `connect_timeout_secs`, `read_timeout_secs`,
/// `write_timeout_secs`, `max_response_bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Upper bound for any JSON response body.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

/// How categorical features are put on the wire.
///
/// Config keys: `client_side`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingSettings {
    /// Map categorical values to integer codes before sending. When false the
    /// raw values are sent and the backend performs the encoding.
    #[serde(default = "default_true")]
    pub client_side: bool,
}

/// Prediction history paging.
///
/// Config keys: `page_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Console and file logging.
///
/// Config keys: `level`, `file`, `keep_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `MODELDESK_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write a log file per launch under the app logs directory.
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default = "default_keep_log_files")]
    pub keep_files: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            http: HttpSettings::default(),
            encoding: EncodingSettings::default(),
            history: HistorySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_io_timeout_secs(),
            write_timeout_secs: default_io_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self { client_side: true }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
            keep_files: default_keep_log_files(),
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl AppConfig {
    /// Parse and validate the configured base URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.server.base_url)
    }

    /// Apply per-run overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(BASE_URL_ENV) {
            let value = value.trim();
            if !value.is_empty() {
                self.server.base_url = value.to_string();
            }
        }
    }
}

/// Errors that may occur while loading or saving client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid base URL {value:?}: {reason}")]
    InvalidBaseUrl { value: String, reason: String },
    #[error("No suitable config directory found")]
    NoConfigDir,
    #[error("Unable to prepare config directory {path}: {source}")]
    AppDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from disk, returning defaults if missing.
pub fn load_or_default() -> Result<AppConfig, ConfigError> {
    let path = config_path()?;
    load_from_path(&path)
}

/// Load configuration from a specific path, returning defaults if missing.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source: SerdeDeError::custom(source),
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist configuration to disk, overwriting any previous contents.
pub fn save(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_path()?;
    save_to_path(config, &path)
}

/// Save configuration to a specific path, creating parent directories as needed.
pub fn save_to_path(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a base URL, requiring an http(s) scheme and a host.
pub fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value.trim()).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::AppDir { path, source },
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_max_response_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_page_size() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_keep_log_files() -> usize {
    10
}
