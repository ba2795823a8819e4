//! Fakes and fixtures shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::application::normalizer::coerce_text;
use crate::domain::{
    document_path, AppError, ChatDatabase, Contact, ContactRows, DatabaseDecryptor,
    DecryptReport, DiscoveredInstance, DocumentWriter, ExportFormat, GroupFlag,
    InstanceDiscovery, Message, MessageFilter, MessageKind, RawContact, Result, SchemaReader,
    Session, TimeRange, VersionTable, SCHEMA_V3,
};
use crate::infrastructure::write_atomic;

pub const TEST_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

pub fn sample_session(output_dir: &str) -> Session {
    Session {
        generation: 0,
        source_dir: PathBuf::from("/wechat/wxid_me"),
        output_dir: PathBuf::from(output_dir),
        owner_id: "wxid_me".into(),
        display_name: "Me".into(),
        app_version: "3.9.12.17".into(),
        schema_version: SCHEMA_V3,
    }
}

pub fn instance(owner_id: &str, display_name: &str, source_dir: &Path) -> DiscoveredInstance {
    DiscoveredInstance {
        owner_id: owner_id.into(),
        display_name: display_name.into(),
        version: "3.9.12.17".into(),
        source_dir: source_dir.to_path_buf(),
        key: Some(TEST_KEY.into()),
    }
}

pub fn write_version_table(path: &Path, versions: &[&str]) {
    let table: serde_json::Map<String, Value> = versions
        .iter()
        .map(|v| ((*v).to_string(), json!([1, 2, 3, 4, 5])))
        .collect();
    fs::write(path, serde_json::to_string(&table).unwrap()).unwrap();
}

/// A raw row whose group flag is an accessor, like the SQLite reader's.
pub fn raw_contact(id: &str, remark: &str, nickname: &str) -> RawContact {
    let is_group = id.ends_with("@chatroom");
    RawContact {
        id: json!(id),
        remark: json!(remark),
        nickname: json!(nickname),
        alias: Value::Null,
        group: GroupFlag::Accessor(Arc::new(move || Ok(is_group))),
    }
}

pub fn text_message(local_id: i64, created_at: i64, is_sender: bool, content: &str) -> Message {
    Message {
        local_id,
        kind: MessageKind::Text,
        sub_type: 0,
        is_sender,
        created_at,
        sender: None,
        content: content.into(),
    }
}

#[derive(Clone, Default)]
pub struct FakeDatabase {
    contacts: Vec<RawContact>,
    messages: HashMap<String, Vec<Message>>,
}

impl FakeDatabase {
    pub fn with_contacts(contacts: Vec<RawContact>) -> Self {
        Self {
            contacts,
            messages: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_messages(mut self, contact_id: &str, messages: Vec<Message>) -> Self {
        self.messages.insert(contact_id.into(), messages);
        self
    }
}

impl ChatDatabase for FakeDatabase {
    fn list_contacts(&self) -> Result<ContactRows> {
        Ok(ContactRows {
            rows: self.contacts.clone(),
            unreadable: 0,
        })
    }

    fn find_contact(&self, id: &str) -> Result<Option<RawContact>> {
        Ok(self
            .contacts
            .iter()
            .find(|c| coerce_text(&c.id) == id)
            .cloned())
    }

    fn messages(
        &self,
        contact_id: &str,
        range: &TimeRange,
        filter: Option<&MessageFilter>,
    ) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .get(contact_id)
            .into_iter()
            .flatten()
            .filter(|m| range.contains(m.created_at))
            .filter(|m| filter.map_or(true, |f| f.contains(&m.kind)))
            .cloned()
            .collect())
    }
}

type OpenHook = Arc<dyn Fn() + Send + Sync>;

/// Hands out a fresh copy of one database per open.
pub struct FakeReader {
    database: Option<FakeDatabase>,
    opens: Arc<AtomicUsize>,
    opened_dirs: Arc<Mutex<Vec<PathBuf>>>,
    on_open: Option<OpenHook>,
}

impl FakeReader {
    pub fn new(database: FakeDatabase) -> Self {
        Self {
            database: Some(database),
            opens: Arc::default(),
            opened_dirs: Arc::default(),
            on_open: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            database: None,
            opens: Arc::default(),
            opened_dirs: Arc::default(),
            on_open: None,
        }
    }

    /// Runs `hook` inside every open, before the database is handed out.
    #[must_use]
    pub fn with_open_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    pub fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }

    pub fn opened_dirs(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.opened_dirs)
    }
}

impl SchemaReader for FakeReader {
    fn open(&self, database_dir: &Path, _schema_version: u32) -> Result<Box<dyn ChatDatabase>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.opened_dirs.lock().unwrap().push(database_dir.to_path_buf());
        if let Some(hook) = &self.on_open {
            hook();
        }
        match &self.database {
            Some(db) => Ok(Box::new(db.clone())),
            None => Err(AppError::DatabaseUnavailable {
                message: format!("no databases under {}", database_dir.display()),
            }),
        }
    }
}

pub struct FakeDiscovery {
    instances: Vec<DiscoveredInstance>,
}

impl FakeDiscovery {
    pub fn new(instances: Vec<DiscoveredInstance>) -> Self {
        Self { instances }
    }
}

impl InstanceDiscovery for FakeDiscovery {
    fn discover(&self, _table: &VersionTable) -> Result<Vec<DiscoveredInstance>> {
        Ok(self.instances.clone())
    }
}

/// Writes two plaintext placeholders, or fails like a wrong key would.
#[derive(Default)]
pub struct FakeDecryptor {
    fail: bool,
}

impl FakeDecryptor {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl DatabaseDecryptor for FakeDecryptor {
    fn decrypt_all(&self, _key: &str, _source: &Path, output: &Path) -> Result<DecryptReport> {
        if self.fail {
            return Err(AppError::DecryptionFailed {
                attempted: 2,
                first_error: "MicroMsg.db: HMAC mismatch".into(),
            });
        }
        let files = ["Msg/MicroMsg.db", "Msg/Multi/MSG0.db"];
        for file in files {
            write_atomic(&output.join(file), b"SQLite format 3\0").unwrap();
        }
        Ok(DecryptReport { files: files.len() })
    }
}

/// Plain-text writer that refuses the listed contact ids.
pub struct FakeWriter {
    refuse: HashSet<String>,
}

impl Default for FakeWriter {
    fn default() -> Self {
        Self::failing_for(&[])
    }
}

impl FakeWriter {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            refuse: ids.iter().map(ToString::to_string).collect(),
        }
    }
}

impl DocumentWriter for FakeWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Txt
    }

    fn write(
        &self,
        db: &dyn ChatDatabase,
        contact: &Contact,
        export_dir: &Path,
        filter: Option<&MessageFilter>,
        range: &TimeRange,
    ) -> Result<PathBuf> {
        if self.refuse.contains(&contact.id) {
            return Err(AppError::Io {
                message: format!("writer refused {}", contact.id),
                source: None,
            });
        }
        let messages = db.messages(&contact.id, range, filter)?;
        let path = document_path(export_dir, contact, ExportFormat::Txt);
        write_atomic(&path, format!("{} messages\n", messages.len()).as_bytes())?;
        Ok(path)
    }
}
