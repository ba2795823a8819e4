//! Application state shared across handlers.

use std::sync::Arc;

use crate::application::{CatalogService, DecryptService, ExportService, SessionStateStore};
use crate::domain::{AppError, Result, TimeRange};

/// Time window used when an export request names no bounds.
#[derive(Debug, Clone)]
pub struct ExportDefaults {
    pub start_time: String,
    pub end_time: String,
}

impl ExportDefaults {
    /// Combines request bounds with the defaults.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when a bound does not parse or the range is inverted.
    pub fn time_range(&self, start: Option<&str>, end: Option<&str>) -> Result<TimeRange> {
        TimeRange::parse(
            start.unwrap_or(&self.start_time),
            end.unwrap_or(&self.end_time),
        )
        .map_err(AppError::invalid_request)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStateStore>,
    pub decrypt: Arc<DecryptService>,
    pub catalog: Arc<CatalogService>,
    pub export: Arc<ExportService>,
    pub export_defaults: ExportDefaults,
}
