//! Database decryptor adapters.
//!
//! Both adapters walk every `*.db` file below the source directory and
//! mirror the relative layout into the output directory. Every file is
//! attempted; the run fails if any single file failed.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::domain::{AppError, DatabaseDecryptor, DecryptReport, Result};

use super::atomic_file::write_atomic;

/// First 16 bytes of every plaintext `SQLite` database.
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Environment variable carrying the key to external decryptors.
pub const KEY_ENV_VAR: &str = "WXEXPORT_KEY";

/// Collects `*.db` files under `source`, in a stable order.
fn database_files(source: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("db")))
        .collect();
    files.sort();
    files
}

/// Runs `decrypt_one` for every database file, accumulating failures.
fn decrypt_each(
    source: &Path,
    output: &Path,
    mut decrypt_one: impl FnMut(&Path, &Path) -> std::result::Result<(), String>,
) -> Result<DecryptReport> {
    let files = database_files(source);
    if files.is_empty() {
        return Err(AppError::DecryptionFailed {
            attempted: 0,
            first_error: format!("no database files under {}", source.display()),
        });
    }

    let attempted = files.len();
    let mut failures = Vec::new();
    for src in &files {
        let relative = src.strip_prefix(source).unwrap_or(src);
        let dst = output.join(relative);
        match decrypt_one(src, &dst) {
            Ok(()) => tracing::debug!(file = %relative.display(), "Decrypted"),
            Err(e) => {
                tracing::warn!(file = %relative.display(), error = %e, "Failed to decrypt");
                failures.push(format!("{}: {e}", relative.display()));
            }
        }
    }

    match failures.first() {
        None => Ok(DecryptReport { files: attempted }),
        Some(first) => Err(AppError::DecryptionFailed {
            attempted,
            first_error: if failures.len() > 1 {
                format!("{first} (and {} more)", failures.len() - 1)
            } else {
                first.clone()
            },
        }),
    }
}

fn has_sqlite_header(path: &Path) -> std::io::Result<bool> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copies databases that are already plaintext; rejects encrypted ones.
#[derive(Debug, Default)]
pub struct PassthroughDecryptor;

impl DatabaseDecryptor for PassthroughDecryptor {
    fn decrypt_all(&self, _key: &str, source: &Path, output: &Path) -> Result<DecryptReport> {
        decrypt_each(source, output, |src, dst| {
            if !has_sqlite_header(src).map_err(|e| e.to_string())? {
                return Err("file is page-encrypted; configure [decrypt].command".into());
            }
            let bytes = fs::read(src).map_err(|e| e.to_string())?;
            write_atomic(dst, &bytes).map_err(|e| e.to_string())
        })
    }
}

/// Runs an external program once per database file.
///
/// Arguments may contain `{src}` and `{dst}`. The key is handed over in
/// [`KEY_ENV_VAR`] so it never shows up in process listings.
#[derive(Debug, Clone)]
pub struct CommandDecryptor {
    program: String,
    args: Vec<String>,
}

impl CommandDecryptor {
    /// # Errors
    /// Returns `Config` when the command line is empty.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| AppError::Config {
            message: "[decrypt].command must name a program".into(),
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn run(&self, key: &str, src: &Path, dst: &Path) -> std::result::Result<(), String> {
        let parent = dst.parent().ok_or("destination has no parent directory")?;
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;

        // The program writes next to the destination; we rename on success.
        let partial = dst.with_extension("db.partial");
        let args = self.args.iter().map(|arg| {
            arg.replace("{src}", &src.to_string_lossy())
                .replace("{dst}", &partial.to_string_lossy())
        });

        let output = Command::new(&self.program)
            .args(args)
            .env(KEY_ENV_VAR, key)
            .output()
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        if !output.status.success() {
            let _ = fs::remove_file(&partial);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", self.program, output.status, stderr.trim()));
        }

        if !has_sqlite_header(&partial).unwrap_or(false) {
            let _ = fs::remove_file(&partial);
            return Err(format!("{} did not produce a plaintext database", self.program));
        }

        fs::rename(&partial, dst).map_err(|e| e.to_string())
    }
}

impl DatabaseDecryptor for CommandDecryptor {
    fn decrypt_all(&self, key: &str, source: &Path, output: &Path) -> Result<DecryptReport> {
        decrypt_each(source, output, |src, dst| self.run(key, src, dst))
    }
}
