//! Loader for the version table shipped next to the service.
//!
//! The file maps client version strings to the memory offsets discovery
//! tooling needs, e.g. `{"3.9.12.17": [93700288, 0, 93701080, 0, 93700600]}`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::{AppError, Result, VersionTable};

/// Reads and parses the version table.
///
/// # Errors
/// Returns `ConfigUnavailable` when the file is missing, unparsable or empty.
pub fn load_version_table(path: &Path) -> Result<VersionTable> {
    let unavailable = |message: String| AppError::ConfigUnavailable {
        path: path.to_path_buf(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
    let entries: HashMap<String, Vec<i64>> =
        serde_json::from_str(&content).map_err(|e| unavailable(format!("invalid JSON: {e}")))?;

    if entries.is_empty() {
        return Err(unavailable("table lists no versions".into()));
    }

    Ok(VersionTable { entries })
}
