use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shellymgr_domain::ErrorKind;

use crate::envelope::error_body;

/// Error surfaced to HTTP callers: an [`ErrorKind`] plus operator text.
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(error_body(self.kind.code(), &self.message));
        (self.status(), body).into_response()
    }
}

impl From<shellymgr_store::StoreError> for ApiError {
    fn from(e: shellymgr_store::StoreError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl From<shellymgr_notify::NotifyError> for ApiError {
    fn from(e: shellymgr_notify::NotifyError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl From<shellymgr_sync::SyncError> for ApiError {
    fn from(e: shellymgr_sync::SyncError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl From<shellymgr_provision::ProvisionError> for ApiError {
    fn from(e: shellymgr_provision::ProvisionError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}

impl From<shellymgr_domain::DomainError> for ApiError {
    fn from(e: shellymgr_domain::DomainError) -> Self {
        ApiError::new(e.kind(), e.to_string())
    }
}
