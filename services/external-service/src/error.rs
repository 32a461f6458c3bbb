use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportIngestError {
    #[error("authentication failed")]
    Authentication,
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, msg: impl Into<String>) -> Self {
        FieldError { field: field.into(), msg: msg.into() }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

impl IntoResponse for ReportIngestError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ReportIngestError::Authentication => (StatusCode::UNAUTHORIZED, "unauthorized".to_owned(), None),
            ReportIngestError::Validation(fields) => (StatusCode::BAD_REQUEST, "validation failed".to_owned(), Some(fields)),
            ReportIngestError::Storage(e) => {
                tracing::error!(error = %e, "report ingest storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned(), None)
            }
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}
