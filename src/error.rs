//! Service error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the query service.
///
/// `Persistence` is a hard failure for query submission but is logged-only
/// for expert-response submission, where the in-memory append and the live
/// broadcast are the primary contract.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or empty input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown query id, or a catalog search that matched nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The catalog or answer generator call failed or returned malformed
    /// data. The caller may retry the whole submission.
    #[error("upstream call failed: {0}")]
    Upstream(anyhow::Error),

    /// The durable mirror could not record the state change.
    #[error("durable store failure: {0}")]
    Persistence(anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {:#}", self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
