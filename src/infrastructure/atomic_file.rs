//! Whole-file writes that never leave a partial file behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::domain::{AppError, Result};

/// Writes `bytes` to `path` through a temp file in the same directory,
/// renaming it into place once complete. Parent directories are created.
///
/// # Errors
/// Returns error if the directory, the temp file or the rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| AppError::io(format!("Failed to create {}", parent.display()), e))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| AppError::io(format!("Failed to create temp file in {}", parent.display()), e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| AppError::io(format!("Failed to write {}", path.display()), e))?;

    tmp.persist(path)
        .map_err(|e| AppError::io(format!("Failed to move {} into place", path.display()), e.error))?;

    Ok(())
}
