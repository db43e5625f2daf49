use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Error loading file: {0}")]
    Ingestion(String),
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    #[error("Column '{column}' has dtype {dtype}, cannot select the largest values of a non-numeric column")]
    NotComparable { column: String, dtype: String },
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("No dataset loaded, upload a CSV file first")]
    NoDataset,
    #[error("DataFrame error: {0}")]
    DataFrame(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<polars::error::PolarsError> for AppError {
    fn from(err: polars::error::PolarsError) -> Self {
        AppError::DataFrame(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Ingestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnknownColumn(_) => StatusCode::BAD_REQUEST,
            AppError::NotComparable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoDataset => StatusCode::CONFLICT,
            AppError::DataFrame(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
