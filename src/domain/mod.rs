//! Domain layer - core types, errors and collaborator interfaces.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod config;
pub mod error;
pub mod models;
pub mod ports;

pub use config::{AppConfig, DecryptConfig, ExportConfig, InstanceConfig};
pub use error::{AppError, Result};
pub use models::{
    document_path, format_timestamp, Contact, ContactCatalog, ContactRows, DecryptReport,
    DiscoveredInstance, ExportFailure, ExportFormat, ExportJob, ExportScope, ExportSummary,
    GroupFlag, Message, MessageFilter, MessageKind, RawContact, Session, SessionDescriptor,
    SessionSummary, TimeRange, DEFAULT_RANGE_END, DEFAULT_RANGE_START, SCHEMA_V3,
};
pub use ports::{
    ChatDatabase, DatabaseDecryptor, DocumentWriter, InstanceDiscovery, SchemaReader,
    VersionTable,
};
