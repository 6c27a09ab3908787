use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::backend::BackendError;

/// Errors surfaced by the profile, booking, review and user services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("Unexpected row shape: {0}")]
    Decode(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::Decode(_) => StatusCode::BAD_GATEWAY,
            Self::Backend(e) => match e {
                BackendError::NotFound(_) => StatusCode::NOT_FOUND,
                BackendError::Guard(_) => StatusCode::BAD_REQUEST,
                BackendError::Rpc { status, .. } if (400..500).contains(status) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Converts a stored row into a typed record.
pub fn decode<T: DeserializeOwned>(row: Value) -> ServiceResult<T> {
    serde_json::from_value(row).map_err(|e| ServiceError::Decode(e.to_string()))
}
