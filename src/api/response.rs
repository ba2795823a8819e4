//! JSON envelope shared by every endpoint.
//!
//! Failures are reported inside a normal 200 response with
//! `success: false`; the status code only signals reachability.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::domain::AppError;

/// `{success, data?, error?, code?}`
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> Envelope<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }
}

/// Handler error: an [`AppError`] rendered as a failure envelope.
#[derive(Debug)]
pub struct ApiError(pub AppError);

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Wraps `data` in a success envelope.
pub const fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.kind();
        let message = self.0.to_string();

        match &self.0 {
            AppError::Database { .. }
            | AppError::Io { .. }
            | AppError::JsonParse { .. }
            | AppError::Config { .. }
            | AppError::TaskFailed { .. } => {
                error!(error_code = code, message = %message, "API error");
            }
            AppError::StateBusy { .. }
            | AppError::DatabaseUnavailable { .. }
            | AppError::DecryptionFailed { .. }
            | AppError::ExportFailed { .. } => {
                warn!(error_code = code, message = %message, "Request failed");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(message),
            code: Some(code),
        };

        (StatusCode::OK, Json(body)).into_response()
    }
}
