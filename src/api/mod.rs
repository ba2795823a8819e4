//! HTTP API module.
//!
//! Serves the operator page and the JSON endpoints driving the
//! decrypt, contacts and export stages.

mod handlers;
mod response;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, ExportDefaults};
