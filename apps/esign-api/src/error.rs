//! Error types for the eSign API

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use esign_core::StampError;
use serde_json::json;
use thiserror::Error;

use crate::drive::DriveError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Bad state: {0}")]
    BadState(String),

    #[error("Signature expired or missing")]
    CacheMiss,

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("Bad signature: {0}")]
    BadSignature(String),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::RecordNotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::BadState(_) => (StatusCode::CONFLICT, "BadState"),
            ApiError::CacheMiss => (StatusCode::CONFLICT, "CacheMiss"),
            ApiError::UnsupportedMedia(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported"),
            ApiError::BadSignature(_) => (StatusCode::BAD_REQUEST, "BadSignature"),
            ApiError::MalformedDocument(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "MalformedDocument")
            }
            ApiError::Drive(_) => (StatusCode::BAD_GATEWAY, "DriveError"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ServerError"),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        let message = match &self {
            ApiError::InvalidRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadState(msg)
            | ApiError::UnsupportedMedia(msg)
            | ApiError::BadSignature(msg)
            | ApiError::MalformedDocument(msg) => msg.clone(),
            ApiError::RecordNotFound(id) => format!("Record not found: {}", id),
            ApiError::CacheMiss => {
                "Signature expired or missing, upload the signature again".to_string()
            }
            ApiError::Drive(e) => {
                tracing::error!(error = %e, "Drive error");
                "Cloud drive request failed".to_string()
            }
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Database error".to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal error".to_string()
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// `Json` whose rejections use the API error body
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::UnsupportedMedia("Expected a JSON body".to_string())
            }
            other => ApiError::InvalidRequest(other.body_text()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::RecordNotFound(id),
            StoreError::InvalidTransition { from, to } => ApiError::BadState(format!(
                "cannot move session from {} to {}",
                from, to
            )),
            StoreError::Conflict(msg) => ApiError::BadState(msg),
            StoreError::Corrupt(msg) => ApiError::Internal(msg),
            StoreError::Database(e) => ApiError::Database(e),
        }
    }
}

impl From<StampError> for ApiError {
    fn from(err: StampError) -> Self {
        match err {
            StampError::MalformedDocument(msg) => ApiError::MalformedDocument(msg),
            StampError::InvalidPlacement(msg) => ApiError::InvalidRequest(msg),
            StampError::InvalidImage(msg) => ApiError::BadSignature(msg),
            StampError::Serialization(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("worker task failed: {}", err))
    }
}
