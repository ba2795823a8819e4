//! Stage 2: the contact catalog of the active session.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{
    AppError, ChatDatabase, Contact, ContactCatalog, ContactRows, Result, SchemaReader,
};

use super::normalizer::normalize_contact;
use super::session_store::{ActiveSession, DatabaseHandle, SessionStateStore};

/// Lists and looks up contacts through the session's database handle.
pub struct CatalogService {
    store: Arc<dyn SessionStateStore>,
    reader: Arc<dyn SchemaReader>,
}

impl CatalogService {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStateStore>, reader: Arc<dyn SchemaReader>) -> Self {
        Self { store, reader }
    }

    /// Returns the normalized catalog, opening the database on first use.
    ///
    /// # Errors
    /// `NoActiveSession`, `DatabaseUnavailable`, or a query failure.
    pub async fn list_contacts(&self) -> Result<ContactCatalog> {
        let active = self.open_database().await?;
        let generation = active.session.generation;
        let handle = active
            .database
            .ok_or_else(|| AppError::no_session("database handle missing after open"))?;

        let catalog = tokio::task::spawn_blocking(move || {
            let db = lock_database(&handle)?;
            let rows = db.list_contacts()?;
            drop(db);
            collect_contacts(rows)
        })
        .await??;

        if catalog.skipped > 0 {
            tracing::warn!(
                generation,
                skipped = catalog.skipped,
                "Skipped malformed contact rows"
            );
        }
        tracing::info!(generation, contacts = catalog.contacts.len(), "Loaded contacts");

        Ok(catalog)
    }

    /// Returns the session with a database attached, opening it if needed.
    ///
    /// The open runs without holding the session lock. If the session is
    /// replaced meanwhile the freshly opened handle is discarded.
    ///
    /// # Errors
    /// `NoActiveSession` or `DatabaseUnavailable`.
    pub async fn open_database(&self) -> Result<ActiveSession> {
        let active = self
            .store
            .get()
            .await?
            .ok_or_else(|| AppError::no_session("decrypt WeChat data first"))?;

        if active.database.is_some() {
            return Ok(active);
        }

        let session = Arc::clone(&active.session);
        let reader = Arc::clone(&self.reader);
        let opened = tokio::task::spawn_blocking(move || {
            reader.open(&session.database_dir(), session.schema_version)
        })
        .await?
        .map_err(|e| match e {
            AppError::DatabaseUnavailable { .. } => e,
            other => AppError::DatabaseUnavailable {
                message: other.to_string(),
            },
        })?;

        let handle: DatabaseHandle = Arc::new(Mutex::new(opened));
        self.store
            .attach_database(active.session.generation, handle)
            .await
    }
}

/// Looks up one contact by id and normalizes it.
///
/// # Errors
/// `ContactNotFound` when the id is unknown or the row has no usable id.
pub fn find_contact(db: &dyn ChatDatabase, id: &str) -> Result<Contact> {
    db.find_contact(id)?
        .as_ref()
        .and_then(normalize_contact)
        .ok_or_else(|| AppError::ContactNotFound { id: id.to_string() })
}

/// Folds raw rows into a catalog, counting rows that could not be used.
///
/// # Errors
/// Returns `DatabaseUnavailable` only when rows existed and none was usable.
pub fn collect_contacts(rows: ContactRows) -> Result<ContactCatalog> {
    let total = rows.rows.len() + rows.unreadable;

    let (contacts, malformed) = rows.rows.iter().fold(
        (Vec::with_capacity(rows.rows.len()), 0usize),
        |(mut contacts, malformed), raw| match normalize_contact(raw) {
            Some(contact) => {
                contacts.push(contact);
                (contacts, malformed)
            }
            None => {
                tracing::warn!(raw = ?raw.id, "Skipping contact row without id");
                (contacts, malformed + 1)
            }
        },
    );

    let skipped = malformed + rows.unreadable;
    if contacts.is_empty() && total > 0 {
        return Err(AppError::DatabaseUnavailable {
            message: format!("all {total} contact rows were malformed"),
        });
    }

    Ok(ContactCatalog { contacts, skipped })
}

/// Locks a shared handle, mapping poisoning to `DatabaseUnavailable`.
///
/// # Errors
/// Returns error when a previous holder panicked.
pub fn lock_database(handle: &DatabaseHandle) -> Result<MutexGuard<'_, Box<dyn ChatDatabase>>> {
    handle.lock().map_err(|_| AppError::DatabaseUnavailable {
        message: "database handle poisoned by an earlier failure".into(),
    })
}
