//! Stage 3: export one contact or the whole catalog into documents.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{
    AppError, Contact, DocumentWriter, ExportFailure, ExportFormat, ExportJob, ExportScope,
    ExportSummary, Result,
};

use super::catalog_service::{collect_contacts, find_contact, lock_database};
use super::normalizer::sanitize_label;
use super::session_store::{DatabaseHandle, SessionStateStore};

/// Format to writer lookup.
#[derive(Default, Clone)]
pub struct WriterRegistry {
    writers: HashMap<ExportFormat, Arc<dyn DocumentWriter>>,
}

impl WriterRegistry {
    #[must_use]
    pub fn new(writers: impl IntoIterator<Item = Arc<dyn DocumentWriter>>) -> Self {
        let mut registry = Self::default();
        for writer in writers {
            registry.register(writer);
        }
        registry
    }

    /// Installs `writer` for its format, replacing any earlier one.
    pub fn register(&mut self, writer: Arc<dyn DocumentWriter>) {
        self.writers.insert(writer.format(), writer);
    }

    #[must_use]
    pub fn get(&self, format: ExportFormat) -> Option<Arc<dyn DocumentWriter>> {
        self.writers.get(&format).cloned()
    }

    /// Formats with a writer installed, in declaration order.
    #[must_use]
    pub fn formats(&self) -> Vec<ExportFormat> {
        ExportFormat::ALL
            .into_iter()
            .filter(|f| self.writers.contains_key(f))
            .collect()
    }
}

/// Successes and failures accumulated over a batch.
#[derive(Debug, Default)]
struct BatchOutcome {
    attempted: usize,
    exported: usize,
    failures: Vec<ExportFailure>,
}

impl BatchOutcome {
    fn record(mut self, contact: &Contact, result: Result<PathBuf>) -> Self {
        self.attempted += 1;
        match result {
            Ok(path) => {
                tracing::debug!(contact_id = %contact.id, path = %path.display(), "Exported");
                self.exported += 1;
            }
            Err(e) => {
                tracing::warn!(contact_id = %contact.id, error = %e, "Batch export failed for contact");
                self.failures.push(ExportFailure {
                    contact_id: contact.id.clone(),
                    error: e.to_string(),
                });
            }
        }
        self
    }
}

/// Resolves formats to writers and runs single or batch exports.
pub struct ExportService {
    store: Arc<dyn SessionStateStore>,
    writers: WriterRegistry,
    export_dir: PathBuf,
    batch_deadline: Option<Duration>,
}

impl ExportService {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStateStore>,
        writers: WriterRegistry,
        export_dir: PathBuf,
        batch_deadline: Option<Duration>,
    ) -> Self {
        Self {
            store,
            writers,
            export_dir,
            batch_deadline,
        }
    }

    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    #[must_use]
    pub const fn writers(&self) -> &WriterRegistry {
        &self.writers
    }

    /// Returns the database handle of the active session.
    ///
    /// # Errors
    /// `NoActiveSession` before decrypt, or before the contact list opened
    /// the database.
    pub async fn ready_database(&self) -> Result<DatabaseHandle> {
        self.store
            .get()
            .await?
            .ok_or_else(|| AppError::no_session("decrypt WeChat data first"))?
            .database
            .ok_or_else(|| AppError::no_session("load the contact list first"))
    }

    /// Executes `job` and reports what was written.
    ///
    /// # Errors
    /// `NoActiveSession` without an open database, `UnsupportedFormat` when
    /// no writer is installed, `ContactNotFound`/`ExportFailed` for a single
    /// contact. Batch member failures are reported in the summary instead.
    pub async fn export(&self, job: ExportJob) -> Result<ExportSummary> {
        let started = Instant::now();

        let handle = self.ready_database().await?;

        let writer = self.writers.get(job.format).ok_or_else(|| {
            AppError::unsupported_format(format!("{} (no writer installed)", job.format))
        })?;

        let export_dir = self.export_dir.clone();
        let deadline = self.batch_deadline;
        let format = job.format;

        let mut summary = tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&export_dir).map_err(|e| {
                AppError::io(
                    format!("Failed to create export directory {}", export_dir.display()),
                    e,
                )
            })?;

            match &job.scope {
                ExportScope::Single(id) => {
                    export_single(&handle, writer.as_ref(), id, &export_dir, &job)
                }
                ExportScope::Batch => {
                    export_batch(&handle, writer.as_ref(), &export_dir, &job, deadline)
                }
            }
        })
        .await??;

        summary.duration = started.elapsed();
        tracing::info!(
            format = %format,
            exported = summary.exported,
            total = summary.total,
            failed = summary.failures.len(),
            timed_out = summary.timed_out,
            duration_ms = summary.duration.as_millis(),
            "Export finished"
        );

        Ok(summary)
    }
}

fn export_single(
    handle: &DatabaseHandle,
    writer: &dyn DocumentWriter,
    contact_id: &str,
    export_dir: &Path,
    job: &ExportJob,
) -> Result<ExportSummary> {
    let db = lock_database(handle)?;
    let contact = find_contact(&**db, contact_id)?;

    let path = writer
        .write(
            &**db,
            &contact,
            export_dir,
            job.message_filter.as_ref(),
            &job.time_range,
        )
        .map_err(|e| AppError::ExportFailed {
            contact_id: contact.id.clone(),
            source: Box::new(e),
        })?;
    tracing::info!(contact_id = %contact.id, path = %path.display(), "Exported contact");

    Ok(ExportSummary {
        output_dir: export_dir.to_path_buf(),
        duration: Duration::ZERO,
        scope: job.scope.clone(),
        exported: 1,
        total: 1,
        failures: Vec::new(),
        timed_out: false,
    })
}

/// Exports every catalog contact, taking the handle lock per contact so
/// other readers can interleave.
fn export_batch(
    handle: &DatabaseHandle,
    writer: &dyn DocumentWriter,
    export_dir: &Path,
    job: &ExportJob,
    deadline: Option<Duration>,
) -> Result<ExportSummary> {
    let rows = lock_database(handle)?.list_contacts()?;
    let contacts = disambiguate_labels(collect_contacts(rows)?.contacts);
    let total = contacts.len();

    let started = Instant::now();
    let outcome = contacts
        .iter()
        .take_while(|_| !deadline.is_some_and(|d| started.elapsed() >= d))
        .fold(BatchOutcome::default(), |outcome, contact| {
            let result = lock_database(handle).and_then(|db| {
                writer.write(
                    &**db,
                    contact,
                    export_dir,
                    job.message_filter.as_ref(),
                    &job.time_range,
                )
            });
            outcome.record(contact, result)
        });

    let timed_out = outcome.attempted < total;
    if timed_out {
        tracing::warn!(
            attempted = outcome.attempted,
            total,
            "Batch deadline elapsed, remaining contacts not exported"
        );
    }

    Ok(ExportSummary {
        output_dir: export_dir.to_path_buf(),
        duration: Duration::ZERO,
        scope: ExportScope::Batch,
        exported: outcome.exported,
        total,
        failures: outcome.failures,
        timed_out,
    })
}

/// Appends the contact id to every label shared by more than one contact,
/// so each batch member gets its own document path. Labels compare
/// case-insensitively.
fn disambiguate_labels(mut contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for contact in &contacts {
        *seen.entry(contact.display_label.to_lowercase()).or_default() += 1;
    }

    for contact in &mut contacts {
        if seen.get(&contact.display_label.to_lowercase()).copied().unwrap_or(0) > 1 {
            let label = sanitize_label(&format!("{}({})", contact.display_label, contact.id));
            tracing::debug!(contact_id = %contact.id, label = %label, "Shared label disambiguated");
            contact.display_label = label;
        }
    }
    contacts
}
