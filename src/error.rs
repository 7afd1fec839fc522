use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level error codes surfaced to clients in `ERROR` frames.
///
/// Guard violations map one-to-one onto these codes so a client can react
/// to the specific reason instead of a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No ephemeral session exists for a command that needs one.
    NoActiveSession,
    /// The session record vanished (e.g. an event raced a cancel).
    SessionNotFound,
    /// The session is not in a state that accepts this event.
    SessionNotActive,
    /// The target task does not exist or belongs to another user.
    TaskNotFound,
    /// The target task is already marked complete.
    TaskAlreadyComplete,
    /// The target task already has a committed durable session.
    TaskHasSession,
    /// The session already has a task assigned.
    TaskAlreadyAssigned,
    /// The command requires an assigned task and there is none.
    NoTaskAssigned,
    /// The requester does not own the session it is addressing.
    UnauthorizedSession,
    /// The durable commit failed; the ephemeral record was kept for retry.
    PersistFailed,
    /// The inbound frame could not be parsed as a protocol message.
    ParseError,
    /// An unexpected error inside a command handler.
    InternalError,
}

impl ErrorCode {
    /// Human-readable companion message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::NoActiveSession => "No active session for this user",
            ErrorCode::SessionNotFound => "Session not found",
            ErrorCode::SessionNotActive => "Session is not active",
            ErrorCode::TaskNotFound => "Task not found",
            ErrorCode::TaskAlreadyComplete => "Task is already complete",
            ErrorCode::TaskHasSession => "Task already has a recorded session",
            ErrorCode::TaskAlreadyAssigned => "A task is already assigned to this session",
            ErrorCode::NoTaskAssigned => "No task is assigned to this session",
            ErrorCode::UnauthorizedSession => "Session belongs to another user",
            ErrorCode::PersistFailed => "Failed to persist the completed session",
            ErrorCode::ParseError => "Malformed protocol message",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database pool error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A lifecycle or ownership guard rejected the command.
    #[error("Guard violation: {}", .0.message())]
    Guard(ErrorCode),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The protocol error code this error maps to on the socket boundary.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Guard(code) => *code,
            _ => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".to_string())
            }

            AppError::Guard(code) => {
                tracing::debug!("Guard violation: {}", code.message());
                (StatusCode::CONFLICT, code.message().to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}
