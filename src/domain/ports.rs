//! Collaborator interfaces consumed by the pipeline.
//!
//! Key discovery, page decryption, schema reading and document rendering
//! live behind these traits so the coordinators never depend on a concrete
//! implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::Result;
use super::models::{
    Contact, ContactRows, DecryptReport, DiscoveredInstance, ExportFormat, Message,
    MessageFilter, RawContact, TimeRange,
};

/// Version string to memory offsets, as shipped with discovery tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTable {
    pub entries: HashMap<String, Vec<i64>>,
}

impl VersionTable {
    #[must_use]
    pub fn supports(&self, version: &str) -> bool {
        self.entries.contains_key(version)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Enumerates running client instances and their recovered keys.
pub trait InstanceDiscovery: Send + Sync {
    /// # Errors
    /// Returns error when enumeration itself fails.
    fn discover(&self, table: &VersionTable) -> Result<Vec<DiscoveredInstance>>;
}

/// Turns encrypted database files into plaintext ones.
pub trait DatabaseDecryptor: Send + Sync {
    /// Decrypts every database under `source` into `output`, mirroring the
    /// relative layout.
    ///
    /// # Errors
    /// Returns `DecryptionFailed` with the attempted count and first cause.
    fn decrypt_all(&self, key: &str, source: &Path, output: &Path) -> Result<DecryptReport>;
}

/// An open set of plaintext databases for one session.
pub trait ChatDatabase: Send {
    /// # Errors
    /// Returns error when the contact table cannot be queried.
    fn list_contacts(&self) -> Result<ContactRows>;

    /// # Errors
    /// Returns error when the contact table cannot be queried.
    fn find_contact(&self, id: &str) -> Result<Option<RawContact>>;

    /// Messages exchanged with `contact_id` inside `range`, oldest first.
    ///
    /// # Errors
    /// Returns error when a message database cannot be queried.
    fn messages(
        &self,
        contact_id: &str,
        range: &TimeRange,
        filter: Option<&MessageFilter>,
    ) -> Result<Vec<Message>>;
}

/// Opens a [`ChatDatabase`] for a decrypted directory.
pub trait SchemaReader: Send + Sync {
    /// # Errors
    /// Returns `DatabaseUnavailable` when the layout cannot be opened.
    fn open(&self, database_dir: &Path, schema_version: u32) -> Result<Box<dyn ChatDatabase>>;
}

/// Renders one contact's conversation into a document.
pub trait DocumentWriter: Send + Sync {
    fn format(&self) -> ExportFormat;

    /// Writes the document and returns its path. Output must appear
    /// atomically: either the complete file or nothing.
    ///
    /// # Errors
    /// Returns error when reading messages or writing the file fails.
    fn write(
        &self,
        db: &dyn ChatDatabase,
        contact: &Contact,
        export_dir: &Path,
        filter: Option<&MessageFilter>,
        range: &TimeRange,
    ) -> Result<PathBuf>;
}
