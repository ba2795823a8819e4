//! Configuration file management.
//!
//! Handles loading TOML configuration files and writing the default one.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# wxexport configuration
# Auto-generated - edit as needed

[server]
host = "127.0.0.1"
port = 8888

# Upper bound for waiting on the session lock, in milliseconds
lock_timeout_ms = 5000

[paths]
# Per-account decrypted output directories are created under this directory
work_dir = "."

# All exported documents are written under this directory
export_dir = "./exported_data"

# Version to memory offset table used by discovery
version_table = "version_list.json"

[decrypt]
# External decryptor run once per database file. {src} and {dst} are
# replaced with the file paths; the key is passed in WXEXPORT_KEY.
# Without a command the source files must already be plaintext SQLite.
# command = ["wechat-decrypt", "--in", "{src}", "--out", "{dst}"]

# Pick this account when several instances are configured
# owner_id = "wxid_xxx"

[export]
start_time = "2020-01-01 00:00:00"
end_time = "2035-03-12 00:00:00"

# Stop starting new contacts in a batch after this many seconds (0 = never)
batch_deadline_secs = 0

# One entry per WeChat account on this machine
# [[instances]]
# owner_id = "wxid_xxx"
# display_name = "Me"
# version = "3.9.12.17"
# source_dir = "C:/Users/me/Documents/WeChat Files/wxid_xxx"
# key = "64 hex characters"
"#;

/// Load configuration from `path`, or the default location, falling back
/// to defaults when no file exists.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config_path = path.map_or_else(AppConfig::default_config_path, Path::to_path_buf);

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        tracing::debug!(path = %config_path.display(), "No config file, using defaults");
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file {}: {e}", path.display()),
    })
}

/// Create the default configuration file if it doesn't exist.
/// Returns whether a file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");

    Ok(true)
}
