//! Application layer - use cases and orchestration.
//!
//! The three pipeline stages (decrypt, catalog, export), the session store
//! they share, and the contact normalization and rendering they rely on.

pub mod catalog_service;
pub mod decrypt_service;
pub mod document_writer;
pub mod export_service;
pub mod formatter;
pub mod normalizer;
pub mod session_store;

pub use catalog_service::{collect_contacts, CatalogService};
pub use decrypt_service::{DecryptService, DecryptSettings};
pub use export_service::{ExportService, WriterRegistry};
pub use formatter::{format_catalog_stats, format_contacts_table};
pub use session_store::{InMemorySessionStore, SessionStateStore, Stage};
