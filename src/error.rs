// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the HTTP layer.

use crate::db::StorageError;
use crate::document::DocumentError;
use crate::policy::PolicyError;
use crate::receiver::{ReceiveError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Failed to fetch source: {0}")]
    Document(#[from] DocumentError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing or invalid access key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ReceiveError> for AppError {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::Validation(e) => Self::Validation(e),
            ReceiveError::Storage(e) => Self::Storage(e),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Policy(PolicyError::Load(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Policy(_) => StatusCode::BAD_REQUEST,
            Self::Document(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidContentType { .. }) => "INVALID_CONTENT_TYPE",
            Self::Validation(ValidationError::MissingParameter(_)) => "MISSING_PARAMETER",
            Self::Validation(ValidationError::InvalidUrl { .. }) => "INVALID_URL",
            Self::Validation(ValidationError::SameUrl) => "SAME_URL",
            Self::Validation(ValidationError::TargetNotAllowed(_)) => "TARGET_NOT_ALLOWED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Policy(_) => "INVALID_POLICY",
            Self::Document(_) => "SOURCE_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::from(ValidationError::SameUrl).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Policy(PolicyError::Load("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Policy(PolicyError::UnknownPolicy("maybe".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            AppError::from(ValidationError::MissingParameter("source")).code(),
            "MISSING_PARAMETER"
        );
        assert_eq!(AppError::Internal("boom".into()).code(), "INTERNAL_ERROR");
    }
}
