//! Configuration model.
//!
//! Every section has serde defaults so a partial (or missing) file still
//! yields a usable configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::models::{TimeRange, DEFAULT_RANGE_END, DEFAULT_RANGE_START};

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for acquiring the session lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8888
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Parent of the per-owner decrypted output directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Fixed directory all exports are written under.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Version to offset/signature table used by discovery.
    #[serde(default = "default_version_table")]
    pub version_table: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            export_dir: default_export_dir(),
            version_table: default_version_table(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./exported_data")
}

fn default_version_table() -> PathBuf {
    PathBuf::from("version_list.json")
}

/// Decryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecryptConfig {
    /// External decryptor: program followed by arguments; `{src}` and `{dst}`
    /// are substituted per file. Without it files must already be plaintext.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Pick this owner when several instances are discovered.
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_range_start")]
    pub start_time: String,

    #[serde(default = "default_range_end")]
    pub end_time: String,

    /// Stop starting new batch members after this many seconds (0 = never).
    #[serde(default)]
    pub batch_deadline_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            start_time: default_range_start(),
            end_time: default_range_end(),
            batch_deadline_secs: 0,
        }
    }
}

impl ExportConfig {
    /// Default time window for requests that do not name one.
    ///
    /// # Errors
    /// Returns a message when the configured bounds do not parse.
    pub fn time_range(&self) -> Result<TimeRange, String> {
        TimeRange::parse(&self.start_time, &self.end_time)
    }

    #[must_use]
    pub const fn batch_deadline(&self) -> Option<Duration> {
        if self.batch_deadline_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.batch_deadline_secs))
        }
    }
}

fn default_range_start() -> String {
    DEFAULT_RANGE_START.to_string()
}

fn default_range_end() -> String {
    DEFAULT_RANGE_END.to_string()
}

/// A client instance described by the operator, with its key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub owner_id: String,

    #[serde(default)]
    pub display_name: String,

    pub version: String,

    pub source_dir: PathBuf,

    /// 64 hex characters; omitted when not known yet.
    #[serde(default)]
    pub key: Option<String>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub decrypt: DecryptConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl AppConfig {
    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wxexport")
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.server.lock_timeout_ms)
    }
}
