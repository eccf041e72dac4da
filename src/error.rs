use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    // Not found
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),
    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Conflicts
    #[error("Conflict: {0}")]
    Conflict(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // Attachment gateway errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    TransientIo,
    Internal,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ConversationNotFound(_) | AppError::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Database(_) | AppError::Redis(_) | AppError::Storage(_) => {
                ErrorKind::TransientIo
            }
            AppError::Serialization(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may reasonably retry. Nothing retries internally.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            // 404 Not Found
            AppError::ConversationNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::MessageNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),

            // 409 Conflict
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),

            // 503 Service Unavailable
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Cache error".to_string())
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Attachment storage error".to_string(),
                )
            }

            // 500 Internal Server Error
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "retryable": self.is_transient(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_groups_variants() {
        assert_eq!(
            AppError::MessageNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(AppError::validation("empty").kind(), ErrorKind::Validation);
        assert_eq!(AppError::conflict("deleted").kind(), ErrorKind::Conflict);
        assert!(AppError::Storage("down".into()).is_transient());
        assert!(!AppError::validation("empty").is_transient());
    }

    #[test]
    fn maps_to_http_status() {
        let resp = AppError::ConversationNotFound(Uuid::nil()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = AppError::conflict("backward").into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = AppError::validation("empty").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
