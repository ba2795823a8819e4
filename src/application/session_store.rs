//! Holder of the single active session.
//!
//! Critical sections only read or replace an `Arc`; no I/O happens while
//! the lock is held and every acquisition is bounded by a timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{AppError, ChatDatabase, Result, Session};

/// Database handle shared by the catalog and export stages.
///
/// The mutex serializes all access to one handle since the underlying
/// connections are not safe for concurrent use.
pub type DatabaseHandle = Arc<Mutex<Box<dyn ChatDatabase>>>;

/// Snapshot of the store: the session and, once opened, its database.
#[derive(Clone)]
pub struct ActiveSession {
    pub session: Arc<Session>,
    pub database: Option<DatabaseHandle>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("session", &self.session)
            .field("database_open", &self.database.is_some())
            .finish()
    }
}

/// Where the pipeline currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NoSession,
    SessionReady,
    CatalogReady,
}

impl Stage {
    #[must_use]
    pub const fn of(active: Option<&ActiveSession>) -> Self {
        match active {
            None => Self::NoSession,
            Some(ActiveSession { database: None, .. }) => Self::SessionReady,
            Some(_) => Self::CatalogReady,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::SessionReady => "session_ready",
            Self::CatalogReady => "catalog_ready",
        }
    }
}

/// Storage for the active session.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Returns the active session, if any.
    async fn get(&self) -> Result<Option<ActiveSession>>;

    /// Publishes `session` with no database open, replacing any previous one.
    /// The stored generation is assigned here.
    async fn set(&self, session: Session) -> Result<Arc<Session>>;

    /// Drops the active session.
    async fn clear(&self) -> Result<()>;

    /// Clears the session only if it is `generation`. Returns whether it did.
    async fn clear_if(&self, generation: u64) -> Result<bool>;

    /// Binds `database` to the session of `generation`.
    ///
    /// If a handle is already attached to that generation the existing one
    /// wins and is returned. Fails with `NoActiveSession` when the session
    /// was replaced or cleared in the meantime.
    async fn attach_database(
        &self,
        generation: u64,
        database: DatabaseHandle,
    ) -> Result<ActiveSession>;

    async fn stage(&self) -> Result<Stage> {
        Ok(Stage::of(self.get().await?.as_ref()))
    }
}

/// In-process store behind a single `RwLock`.
pub struct InMemorySessionStore {
    slot: RwLock<Option<ActiveSession>>,
    next_generation: AtomicU64,
    lock_timeout: Duration,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            next_generation: AtomicU64::new(1),
            lock_timeout,
        }
    }

    fn busy(&self, op: &str) -> AppError {
        AppError::StateBusy {
            message: format!(
                "could not {op} session state within {} ms",
                self.lock_timeout.as_millis()
            ),
        }
    }

    async fn read(&self) -> Result<tokio::sync::RwLockReadGuard<'_, Option<ActiveSession>>> {
        tokio::time::timeout(self.lock_timeout, self.slot.read())
            .await
            .map_err(|_| self.busy("read"))
    }

    async fn write(&self) -> Result<tokio::sync::RwLockWriteGuard<'_, Option<ActiveSession>>> {
        tokio::time::timeout(self.lock_timeout, self.slot.write())
            .await
            .map_err(|_| self.busy("update"))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl SessionStateStore for InMemorySessionStore {
    async fn get(&self) -> Result<Option<ActiveSession>> {
        Ok(self.read().await?.clone())
    }

    async fn set(&self, mut session: Session) -> Result<Arc<Session>> {
        session.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(session);

        let mut slot = self.write().await?;
        let previous = slot.replace(ActiveSession {
            session: Arc::clone(&session),
            database: None,
        });
        drop(slot);

        if let Some(previous) = previous {
            tracing::info!(
                previous = previous.session.generation,
                current = session.generation,
                "Replaced active session"
            );
        }

        Ok(session)
    }

    async fn clear(&self) -> Result<()> {
        let previous = self.write().await?.take();
        if let Some(previous) = previous {
            tracing::info!(generation = previous.session.generation, "Cleared session");
        }
        Ok(())
    }

    async fn clear_if(&self, generation: u64) -> Result<bool> {
        let mut slot = self.write().await?;
        if slot
            .as_ref()
            .is_some_and(|active| active.session.generation == generation)
        {
            *slot = None;
            drop(slot);
            tracing::info!(generation, "Cleared session");
            return Ok(true);
        }
        Ok(false)
    }

    async fn attach_database(
        &self,
        generation: u64,
        database: DatabaseHandle,
    ) -> Result<ActiveSession> {
        let mut slot = self.write().await?;
        match slot.as_mut() {
            Some(active) if active.session.generation == generation => {
                if active.database.is_none() {
                    active.database = Some(database);
                }
                Ok(active.clone())
            }
            _ => Err(AppError::no_session(
                "session was replaced while its database was being opened",
            )),
        }
    }
}
