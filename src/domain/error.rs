//! Domain-level error types for wxexport.
//!
//! Every failure a request can end in is one variant here. Variants carry
//! enough context to be shown verbatim to the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Version table (offset/signature list) could not be loaded.
    #[error("Version table unavailable at {path}: {message}")]
    ConfigUnavailable { path: PathBuf, message: String },

    /// No running client instance (or no usable one) was found.
    #[error("No WeChat instance available: {message}")]
    SourceUnavailable { message: String },

    /// The selected instance did not yield a decryption key.
    #[error("No decryption key recovered for {owner_id}")]
    KeyUnavailable { owner_id: String },

    /// One or more database files could not be decrypted.
    #[error("Decryption failed ({attempted} file(s) attempted): {first_error}")]
    DecryptionFailed {
        attempted: usize,
        first_error: String,
    },

    /// A stage that needs a session (or an open database) was called too early.
    #[error("No active session: {message}")]
    NoActiveSession { message: String },

    /// The schema reader could not open the decrypted databases.
    #[error("Database unavailable: {message}")]
    DatabaseUnavailable { message: String },

    /// Lookup by id found nothing.
    #[error("Contact not found: {id}")]
    ContactNotFound { id: String },

    /// Requested export format is unknown or has no writer installed.
    #[error("Unsupported export format: {format}")]
    UnsupportedFormat { format: String },

    /// Single-contact export failed inside the document writer.
    #[error("Export failed for {contact_id}: {source}")]
    ExportFailed {
        contact_id: String,
        #[source]
        source: Box<AppError>,
    },

    /// Request body was well-formed JSON but semantically invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Failed to query the database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration file error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Session state could not be acquired within the configured bound.
    #[error("Session state busy: {message}")]
    StateBusy { message: String },

    /// A blocking worker panicked or was cancelled.
    #[error("Background task failed: {message}")]
    TaskFailed { message: String },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    pub fn no_session(message: impl Into<String>) -> Self {
        Self::NoActiveSession {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigUnavailable { .. } => "CONFIG_UNAVAILABLE",
            Self::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            Self::KeyUnavailable { .. } => "KEY_UNAVAILABLE",
            Self::DecryptionFailed { .. } => "DECRYPTION_FAILED",
            Self::NoActiveSession { .. } => "NO_ACTIVE_SESSION",
            Self::DatabaseUnavailable { .. } => "DATABASE_UNAVAILABLE",
            Self::ContactNotFound { .. } => "CONTACT_NOT_FOUND",
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::ExportFailed { .. } => "EXPORT_FAILED",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::JsonParse { .. } => "JSON_PARSE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::StateBusy { .. } => "STATE_BUSY",
            Self::TaskFailed { .. } => "TASK_FAILED",
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
