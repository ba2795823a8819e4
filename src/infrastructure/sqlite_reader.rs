//! `SQLite` schema reader for decrypted WeChat 3.x databases.
//!
//! Layout below the database directory:
//! - `MicroMsg.db`, table `Contact` (`UserName`, `Alias`, `Remark`, `NickName`)
//! - `Multi/MSG<n>.db`, table `MSG` (one file per shard, oldest first)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde_json::Value;

use crate::domain::{
    AppError, ChatDatabase, ContactRows, GroupFlag, Message, MessageFilter, MessageKind,
    RawContact, Result, SchemaReader, TimeRange, SCHEMA_V3,
};

const CONTACT_DB: &str = "MicroMsg.db";
const MESSAGE_SHARD_DIR: &str = "Multi";
const GROUP_SUFFIX: &str = "@chatroom";

const CONTACT_COLUMNS: &str = "SELECT UserName, Alias, Remark, NickName FROM Contact";

/// Opens schema version 3 layouts; every other version is unavailable.
#[derive(Debug, Default)]
pub struct SqliteSchemaReader;

impl SchemaReader for SqliteSchemaReader {
    fn open(&self, database_dir: &Path, schema_version: u32) -> Result<Box<dyn ChatDatabase>> {
        if schema_version != SCHEMA_V3 {
            return Err(AppError::DatabaseUnavailable {
                message: format!("no reader for schema version {schema_version}"),
            });
        }
        Ok(Box::new(V3Database::open(database_dir)?))
    }
}

/// Read-only connections to one decrypted data set.
pub struct V3Database {
    contacts: Connection,
    shards: Vec<Connection>,
}

impl V3Database {
    /// Opens the contact database and every message shard.
    ///
    /// # Errors
    /// Returns `DatabaseUnavailable` if the contact database is missing or
    /// any file cannot be opened.
    pub fn open(database_dir: &Path) -> Result<Self> {
        let contact_path = database_dir.join(CONTACT_DB);
        if !contact_path.is_file() {
            return Err(AppError::DatabaseUnavailable {
                message: format!("{} not found", contact_path.display()),
            });
        }

        let contacts = open_read_only(&contact_path)?;
        let shards = message_shards(&database_dir.join(MESSAGE_SHARD_DIR))
            .iter()
            .map(|path| open_read_only(path))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            dir = %database_dir.display(),
            shards = shards.len(),
            "Opened WeChat databases"
        );

        Ok(Self { contacts, shards })
    }

    fn messages_in_shard(
        shard: &Connection,
        contact_id: &str,
        range: &TimeRange,
        is_group: bool,
    ) -> Result<Vec<Message>> {
        let mut stmt = shard
            .prepare(
                "SELECT localId, Type, SubType, IsSender, CreateTime, StrContent
                 FROM MSG
                 WHERE StrTalker = ?1 AND CreateTime BETWEEN ?2 AND ?3
                 ORDER BY CreateTime, localId",
            )
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map(params![contact_id, range.start, range.end], |row| {
                message_from_row(row, is_group)
            })
            .map_err(AppError::database)?;

        let mut messages = Vec::new();
        for row in rows {
            match row {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!(contact_id, "Failed to read message row: {}", e),
            }
        }
        Ok(messages)
    }
}

impl ChatDatabase for V3Database {
    fn list_contacts(&self) -> Result<ContactRows> {
        let mut stmt = self
            .contacts
            .prepare(&format!("{CONTACT_COLUMNS} ORDER BY rowid"))
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([], raw_contact_from_row)
            .map_err(AppError::database)?;

        let mut contacts = ContactRows::default();
        for row in rows {
            match row {
                Ok(raw) => contacts.rows.push(raw),
                Err(e) => {
                    tracing::warn!("Failed to read contact row: {}", e);
                    contacts.unreadable += 1;
                }
            }
        }

        tracing::debug!(
            rows = contacts.rows.len(),
            unreadable = contacts.unreadable,
            "Fetched contact rows"
        );

        Ok(contacts)
    }

    fn find_contact(&self, id: &str) -> Result<Option<RawContact>> {
        let mut stmt = self
            .contacts
            .prepare(&format!("{CONTACT_COLUMNS} WHERE UserName = ?1 LIMIT 1"))
            .map_err(AppError::database)?;

        let mut rows = stmt
            .query_map([id], raw_contact_from_row)
            .map_err(AppError::database)?;

        let found = rows.next().transpose().map_err(AppError::database)?;
        Ok(found)
    }

    fn messages(
        &self,
        contact_id: &str,
        range: &TimeRange,
        filter: Option<&MessageFilter>,
    ) -> Result<Vec<Message>> {
        let is_group = contact_id.ends_with(GROUP_SUFFIX);

        let mut messages = Vec::new();
        for shard in &self.shards {
            messages.extend(Self::messages_in_shard(shard, contact_id, range, is_group)?);
        }

        // Shards hold disjoint time spans, a stable sort keeps shard order on ties.
        messages.sort_by_key(|m| m.created_at);
        if let Some(filter) = filter {
            messages.retain(|m| filter.contains(&m.kind));
        }

        Ok(messages)
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let unavailable = |e: rusqlite::Error| AppError::DatabaseUnavailable {
        message: format!("{}: {e}", path.display()),
    };

    let conn = Connection::open_with_flags(path, flags).map_err(unavailable)?;
    conn.execute_batch(
        "PRAGMA query_only = ON;
         PRAGMA temp_store = MEMORY;",
    )
    .map_err(unavailable)?;

    Ok(conn)
}

/// `MSG0.db`, `MSG1.db`, ... sorted by shard number.
fn message_shards(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "No message shard directory");
        return Vec::new();
    };

    let mut shards: Vec<(u32, PathBuf)> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let number = name.strip_prefix("MSG")?.strip_suffix(".db")?.parse().ok()?;
            Some((number, path))
        })
        .collect();
    shards.sort_by_key(|(number, _)| *number);
    shards.into_iter().map(|(_, path)| path).collect()
}

/// Converts a column to JSON without assuming its storage class.
fn column_value(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    })
}

fn raw_contact_from_row(row: &Row<'_>) -> rusqlite::Result<RawContact> {
    let id = column_value(row, 0)?;
    let is_group = id.as_str().is_some_and(|s| s.ends_with(GROUP_SUFFIX));

    Ok(RawContact {
        id,
        alias: column_value(row, 1)?,
        remark: column_value(row, 2)?,
        nickname: column_value(row, 3)?,
        group: GroupFlag::Accessor(Arc::new(move || Ok(is_group))),
    })
}

fn message_from_row(row: &Row<'_>, is_group: bool) -> rusqlite::Result<Message> {
    let is_sender = row.get::<_, Option<i64>>(3)?.unwrap_or(0) != 0;
    // Some shards store StrContent as BLOB; read it lossily like contact text.
    let raw_content = match column_value(row, 5)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    };

    // Group messages from others carry "<member id>:\n" in front of the text.
    let (sender, content) = if is_group && !is_sender {
        match raw_content.split_once(":\n") {
            Some((member, text)) if !member.is_empty() && !member.contains(char::is_whitespace) => {
                (Some(member.to_string()), text.to_string())
            }
            _ => (None, raw_content),
        }
    } else {
        (None, raw_content)
    };

    Ok(Message {
        local_id: row.get(0)?,
        kind: MessageKind::from_code(row.get::<_, Option<i64>>(1)?.unwrap_or(0)),
        sub_type: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        is_sender,
        created_at: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        sender,
        content,
    })
}
