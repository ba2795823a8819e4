//! Domain models for decrypted WeChat data and export jobs.
//!
//! These models describe the active session, the contact catalog and the
//! export requests flowing through the three pipeline stages.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sub-directory of an output directory holding the plaintext databases.
pub const DATABASE_SUBDIR: &str = "Msg";

/// File name of the session descriptor inside [`DATABASE_SUBDIR`].
pub const DESCRIPTOR_FILE: &str = "info.json";

/// Schema version produced by the 3.x client family.
pub const SCHEMA_V3: u32 = 3;

/// Timestamp layout accepted for time window bounds.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_RANGE_START: &str = "2020-01-01 00:00:00";
pub const DEFAULT_RANGE_END: &str = "2035-03-12 00:00:00";

/// The process-wide record of which decrypted data source is active.
///
/// Immutable once published. A re-run of decryption produces a new value
/// with a new `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Monotonic id assigned by the session store on publish.
    pub generation: u64,
    /// Originating (encrypted) data directory.
    pub source_dir: PathBuf,
    /// Directory holding the decrypted files.
    pub output_dir: PathBuf,
    /// Account id of the data owner.
    pub owner_id: String,
    /// Human-readable owner name.
    pub display_name: String,
    /// Client version string reported by discovery.
    pub app_version: String,
    /// Selects the schema reader behavior.
    pub schema_version: u32,
}

impl Session {
    /// Directory containing the plaintext databases.
    #[must_use]
    pub fn database_dir(&self) -> PathBuf {
        self.output_dir.join(DATABASE_SUBDIR)
    }

    /// Location of the session descriptor file.
    #[must_use]
    pub fn descriptor_path(&self) -> PathBuf {
        self.database_dir().join(DESCRIPTOR_FILE)
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            nickname: self.display_name.clone(),
            wxid: self.owner_id.clone(),
            version: self.app_version.clone(),
            db_path: self.database_dir(),
        }
    }
}

/// Persisted description of a decrypted data set, consumed by other tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub wxid: String,
    pub name: String,
    pub wx_dir: PathBuf,
}

impl From<&Session> for SessionDescriptor {
    fn from(session: &Session) -> Self {
        Self {
            wxid: session.owner_id.clone(),
            name: session.display_name.clone(),
            wx_dir: session.source_dir.clone(),
        }
    }
}

/// What a successful decrypt reports back to the caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub nickname: String,
    pub wxid: String,
    pub version: String,
    pub db_path: PathBuf,
}

/// A running client instance found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInstance {
    pub owner_id: String,
    pub display_name: String,
    pub version: String,
    pub source_dir: PathBuf,
    /// Recovered key as hex, absent when recovery failed.
    pub key: Option<String>,
}

/// Outcome of a successful decryption run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptReport {
    /// Number of database files written.
    pub files: usize,
}

/// Group classification as supplied by the schema reader.
#[derive(Clone, Default)]
pub enum GroupFlag {
    /// A classification callback exposed by the source row.
    Accessor(Arc<dyn Fn() -> Result<bool, String> + Send + Sync>),
    /// A plain stored field of any shape.
    Field(Value),
    #[default]
    Absent,
}

impl fmt::Debug for GroupFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accessor(_) => f.write_str("Accessor(..)"),
            Self::Field(v) => f.debug_tuple("Field").field(v).finish(),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

/// Contact row exactly as the schema reader produced it.
///
/// Name-bearing fields can be null, strings, numbers or arrays of parts.
#[derive(Debug, Clone, Default)]
pub struct RawContact {
    pub id: Value,
    pub remark: Value,
    pub nickname: Value,
    pub alias: Value,
    pub group: GroupFlag,
}

/// Raw contact rows plus the number the reader could not decode at all.
#[derive(Debug, Default)]
pub struct ContactRows {
    pub rows: Vec<RawContact>,
    pub unreadable: usize,
}

/// A canonical contact: string-typed, filesystem-safe label.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Contact {
    #[serde(rename = "wxid")]
    pub id: String,
    #[serde(rename = "nickname")]
    pub display_label: String,
    #[serde(rename = "is_chatroom")]
    pub is_group: bool,
    /// Coerced alias, kept for writers; not part of the wire format.
    #[serde(skip)]
    pub alias: String,
}

/// Normalized catalog in source order.
#[derive(Debug, Default)]
pub struct ContactCatalog {
    pub contacts: Vec<Contact>,
    /// Rows dropped as malformed.
    pub skipped: usize,
}

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Html,
    Txt,
    Docx,
    Markdown,
    Xlsx,
}

impl ExportFormat {
    pub const ALL: [Self; 5] = [
        Self::Html,
        Self::Txt,
        Self::Docx,
        Self::Markdown,
        Self::Xlsx,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Txt => "txt",
            Self::Docx => "docx",
            Self::Markdown => "markdown",
            Self::Xlsx => "xlsx",
        }
    }

    /// File extension written for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            other => other.name(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "txt" => Ok(Self::Txt),
            "docx" => Ok(Self::Docx),
            "markdown" | "md" => Ok(Self::Markdown),
            "xlsx" => Ok(Self::Xlsx),
            _ => Err(s.to_string()),
        }
    }
}

/// Message kinds as stored in the `Type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    Emoji,
    Location,
    App,
    Call,
    System,
    Other(i64),
}

impl MessageKind {
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            34 => Self::Voice,
            43 => Self::Video,
            47 => Self::Emoji,
            48 => Self::Location,
            49 => Self::App,
            50 => Self::Call,
            10000 | 10002 => Self::System,
            other => Self::Other(other),
        }
    }

    /// Placeholder shown instead of binary payloads.
    #[must_use]
    pub const fn placeholder(self) -> Option<&'static str> {
        match self {
            Self::Text | Self::System => None,
            Self::Image => Some("[image]"),
            Self::Voice => Some("[voice]"),
            Self::Video => Some("[video]"),
            Self::Emoji => Some("[sticker]"),
            Self::Location => Some("[location]"),
            Self::App => Some("[link/file]"),
            Self::Call => Some("[call]"),
            Self::Other(_) => Some("[unsupported message]"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            "emoji" | "sticker" => Ok(Self::Emoji),
            "location" => Ok(Self::Location),
            "app" | "link" | "file" => Ok(Self::App),
            "call" => Ok(Self::Call),
            "system" => Ok(Self::System),
            _ => Err(format!(
                "Unknown message type: {s}. Use: text, image, voice, video, emoji, location, app, call, system"
            )),
        }
    }
}

/// Set of message kinds to include; `None` at use sites means all.
pub type MessageFilter = HashSet<MessageKind>;

/// Inclusive time window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// Parses `YYYY-MM-DD HH:MM:SS` bounds in local time.
    ///
    /// # Errors
    /// Returns a message when a bound does not parse or `start > end`.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let range = Self {
            start: parse_local_timestamp(start)?,
            end: parse_local_timestamp(end)?,
        };
        if range.start > range.end {
            return Err(format!("time range start {start} is after end {end}"));
        }
        Ok(range)
    }

    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::parse(DEFAULT_RANGE_START, DEFAULT_RANGE_END).unwrap_or(Self {
            start: 1_577_836_800,
            end: 2_057_356_800,
        })
    }
}

fn parse_local_timestamp(value: &str) -> Result<i64, String> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|e| format!("invalid timestamp '{value}' (expected {TIME_FORMAT}): {e}"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| format!("timestamp '{value}' does not exist in local time"))
}

/// Formats unix seconds for documents.
#[must_use]
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0).map_or_else(
        || timestamp.to_string(),
        |dt| dt.with_timezone(&Local).format(TIME_FORMAT).to_string(),
    )
}

/// Which contacts an export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    Single(String),
    Batch,
}

/// One export request, executed synchronously and then discarded.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub format: ExportFormat,
    pub scope: ExportScope,
    pub time_range: TimeRange,
    pub message_filter: Option<MessageFilter>,
}

impl ExportJob {
    #[must_use]
    pub fn single(format: ExportFormat, contact_id: impl Into<String>) -> Self {
        Self {
            format,
            scope: ExportScope::Single(contact_id.into()),
            time_range: TimeRange::default(),
            message_filter: None,
        }
    }

    #[must_use]
    pub fn batch(format: ExportFormat) -> Self {
        Self {
            format,
            scope: ExportScope::Batch,
            time_range: TimeRange::default(),
            message_filter: None,
        }
    }

    #[must_use]
    pub const fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<MessageFilter>) -> Self {
        self.message_filter = filter;
        self
    }
}

/// A single chat message read from the message databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub local_id: i64,
    pub kind: MessageKind,
    pub sub_type: i64,
    pub is_sender: bool,
    /// Unix seconds.
    pub created_at: i64,
    /// Member id for group messages, `None` for 1:1 chats.
    pub sender: Option<String>,
    pub content: String,
}

/// One contact that a batch could not export.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportFailure {
    #[serde(rename = "wxid")]
    pub contact_id: String,
    pub error: String,
}

/// Result of an export call.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub output_dir: PathBuf,
    pub duration: Duration,
    pub scope: ExportScope,
    /// Contacts written successfully.
    pub exported: usize,
    /// Contacts in the catalog (1 for single scope).
    pub total: usize,
    pub failures: Vec<ExportFailure>,
    /// Batch stopped early because the deadline elapsed.
    pub timed_out: bool,
}

impl ExportSummary {
    /// Elapsed seconds rounded to two decimals.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        (self.duration.as_secs_f64() * 100.0).round() / 100.0
    }
}

/// Builds `<dir>/<label>/<label>.<ext>` for a contact document.
///
/// The result always stays below `export_dir`: a label that is not a single
/// plain path component is replaced by the contact id, and an id that is
/// not one either by a fixed name.
#[must_use]
pub fn document_path(export_dir: &Path, contact: &Contact, format: ExportFormat) -> PathBuf {
    let name = [contact.display_label.as_str(), contact.id.as_str()]
        .into_iter()
        .find(|candidate| is_plain_component(candidate))
        .unwrap_or(FALLBACK_DOCUMENT_NAME);

    export_dir
        .join(name)
        .join(format!("{name}.{}", format.extension()))
}

const FALLBACK_DOCUMENT_NAME: &str = "contact";

fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}
