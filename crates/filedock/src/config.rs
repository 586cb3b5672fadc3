//! Configuration for filedock server and client

use crate::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filedock configuration, shared by server and client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listener address for the server, connect address for the client
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Directory holding uploaded files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Directory the client downloads into
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Deadline for each socket operation and store-lock acquisition, in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Largest accepted upload in bytes (0 = only the length-prefix limit)
    #[serde(default)]
    pub max_upload_bytes: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
    /// File receiving every reported handler failure
    pub error_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            error_log: Some(PathBuf::from("error.log")),
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging, one object per line
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage_dir: default_storage_dir(),
            temp_dir: default_temp_dir(),
            io_timeout_secs: default_io_timeout(),
            max_upload_bytes: 0,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    /// Write configuration as pretty TOML, creating the parent directory
    ///
    /// # Errors
    ///
    /// [`Error::Config`] on serialization failure, [`Error::Io`] on write failure.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Deadline applied to every socket operation
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Validate configuration
    ///
    /// Directories are created on demand, so they only have to be distinct
    /// and not point at existing regular files. Port 0 is accepted and binds
    /// an ephemeral port.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.io_timeout_secs == 0 {
            return Err(Error::Config(
                "io_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.max_upload_bytes > i32::MAX as u64 {
            return Err(Error::Config(format!(
                "max_upload_bytes cannot exceed {} (length prefix limit)",
                i32::MAX
            )));
        }

        if self.storage_dir == self.temp_dir {
            return Err(Error::Config(
                "storage_dir and temp_dir must be different directories".to_string(),
            ));
        }

        for (key, dir) in [("storage_dir", &self.storage_dir), ("temp_dir", &self.temp_dir)] {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::Config(format!(
                    "{key} is not a directory: {}",
                    dir.display()
                )));
            }
        }

        for (key, file) in [
            ("logging.file", &self.logging.file),
            ("logging.error_log", &self.logging.error_log),
        ] {
            if let Some(file) = file {
                validate_log_path(key, file)?;
            }
        }

        Ok(())
    }
}

fn validate_log_path(key: &str, file: &Path) -> Result<()> {
    if file.file_name().is_none() {
        return Err(Error::Config(format!("{key} must include a file name")));
    }

    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => Err(Error::Config(
            format!("{key} parent directory does not exist: {}", parent.display()),
        )),
        _ => Ok(()),
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 5000)
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("FileStorage")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("TempFiles")
}

fn default_io_timeout() -> u64 {
    30
}
