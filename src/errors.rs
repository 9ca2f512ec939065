use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unique error codes for client identification
#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    // Database errors (1xxx)
    DatabaseQuery = 1002,

    // Validation errors (2xxx)
    ValidationFailed = 2001,

    // External service errors (5xxx)
    EmbeddingFailed = 5001,
    RetrievalFailed = 5002,
    ModelInvocationFailed = 5003,
    EmptyModelResponse = 5004,

    // Resource errors (6xxx)
    NotFound = 6001,
    AlreadyExists = 6002,

    // Internal errors (9xxx)
    InternalError = 9001,
    ConfigurationError = 9002,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// Error types for the RAG pipeline and its HTTP surface
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database query error: {0}")]
    DatabaseQueryError(#[from] sea_orm::DbErr),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Embedding service returned no usable vector: {0}")]
    EmbeddingError(String),

    #[error("Retrieval failed: {0}")]
    RetrievalError(String),

    #[error("Model invocation failed: {0}")]
    ModelError(String),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Document with this text already exists")]
    DuplicateDocument,

    #[error("Resource not found: {resource_type} with id {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl AppError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DatabaseQueryError(_) => ErrorCode::DatabaseQuery,
            Self::ValidationError(_) => ErrorCode::ValidationFailed,
            Self::EmbeddingError(_) => ErrorCode::EmbeddingFailed,
            Self::RetrievalError(_) => ErrorCode::RetrievalFailed,
            Self::ModelError(_) => ErrorCode::ModelInvocationFailed,
            Self::EmptyResponse => ErrorCode::EmptyModelResponse,
            Self::DuplicateDocument => ErrorCode::AlreadyExists,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InternalError(_) => ErrorCode::InternalError,
            Self::ConfigError(_) => ErrorCode::ConfigurationError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseQueryError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::EmbeddingError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RetrievalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ModelError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EmptyResponse => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DuplicateDocument => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the client. Server-side failures get a
    /// generic message; the full error stays in the logs.
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        match &self {
            AppError::ValidationError(_)
            | AppError::DuplicateDocument
            | AppError::NotFound { .. } => {
                tracing::debug!(error_code = error_code.as_u16(), error = %self, "Client error");
            }
            _ => {
                tracing::error!(error_code = error_code.as_u16(), error = %self, "Server error");
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code.as_u16(),
                "status": status.as_u16(),
                "message": self.public_message(),
                "details": if cfg!(debug_assertions) {
                    Some(format!("{:?}", self))
                } else {
                    None
                }
            }
        }));

        (status, body).into_response()
    }
}

/// Helper macro for creating NotFound errors
#[macro_export]
macro_rules! not_found {
    ($resource_type:expr, $resource_id:expr) => {
        $crate::errors::AppError::NotFound {
            resource_type: $resource_type.to_string(),
            resource_id: $resource_id.to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_document_maps_to_conflict() {
        let err = AppError::DuplicateDocument;
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code().as_u16(), 6002);
    }

    #[test]
    fn server_errors_do_not_leak_detail() {
        let err = AppError::EmbeddingError("upstream said 503".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::ValidationError("'text' must be a non-empty string".to_string());
        assert!(err.public_message().contains("'text'"));
    }
}
