//! Infrastructure layer - external adapters (database, filesystem, processes).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod atomic_file;
pub mod config;
pub mod decryptor;
pub mod discovery;
pub mod sqlite_reader;
pub mod version_table;

pub use atomic_file::write_atomic;
pub use config::{ensure_config_exists, load_config};
pub use decryptor::{CommandDecryptor, PassthroughDecryptor};
pub use discovery::ConfiguredDiscovery;
pub use sqlite_reader::SqliteSchemaReader;
pub use version_table::load_version_table;
