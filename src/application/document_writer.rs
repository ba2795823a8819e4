//! Bundled document writers for the text-based formats.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{
    document_path, AppError, ChatDatabase, Contact, DocumentWriter, ExportFormat, MessageFilter,
    Result, TimeRange,
};
use crate::infrastructure::write_atomic;

use super::export_service::WriterRegistry;
use super::formatter::render_conversation;

/// Renders a conversation with [`render_conversation`] and persists it
/// atomically to `<export_dir>/<label>/<label>.<ext>`.
#[derive(Debug, Clone, Copy)]
pub struct TextDocumentWriter {
    format: ExportFormat,
}

impl TextDocumentWriter {
    /// Formats with a text renderer.
    pub const FORMATS: [ExportFormat; 3] =
        [ExportFormat::Html, ExportFormat::Txt, ExportFormat::Markdown];

    #[must_use]
    pub const fn new(format: ExportFormat) -> Self {
        Self { format }
    }
}

impl DocumentWriter for TextDocumentWriter {
    fn format(&self) -> ExportFormat {
        self.format
    }

    fn write(
        &self,
        db: &dyn ChatDatabase,
        contact: &Contact,
        export_dir: &Path,
        filter: Option<&MessageFilter>,
        range: &TimeRange,
    ) -> Result<PathBuf> {
        let messages = db.messages(&contact.id, range, filter)?;
        let content = render_conversation(self.format, contact, &messages)
            .ok_or_else(|| AppError::unsupported_format(self.format.name()))?;

        let path = document_path(export_dir, contact, self.format);
        write_atomic(&path, content.as_bytes())?;

        tracing::debug!(
            contact_id = %contact.id,
            messages = messages.len(),
            path = %path.display(),
            "Wrote document"
        );

        Ok(path)
    }
}

impl WriterRegistry {
    /// Registry with every bundled writer installed.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            TextDocumentWriter::FORMATS
                .into_iter()
                .map(|format| Arc::new(TextDocumentWriter::new(format)) as Arc<dyn DocumentWriter>),
        )
    }
}
