use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors
///
/// Each variant is a distinct business failure with a natural HTTP
/// mapping. Financial workflows are all-or-nothing: any of these raised
/// mid-transaction rolls the whole unit of work back.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Insufficient balance. Required: {required}, Current: {current}")]
    InsufficientFunds { required: i64, current: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Hold {hold_id} over-release: requested {requested}, available {available}")]
    OverRelease {
        hold_id: String,
        requested: i64,
        available: i64,
    },

    #[error("Concurrent update detected. Please retry.")]
    Conflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convert SettlementError to HTTP responses
///
/// Business errors are not 500s. Amounts are disclosed for insufficient
/// funds (required vs current); datastore internals never are.
impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            SettlementError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            SettlementError::InsufficientFunds { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            SettlementError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),

            SettlementError::InvalidTransition(_) | SettlementError::OverRelease { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }

            SettlementError::Conflict => (StatusCode::CONFLICT, self.to_string()),

            SettlementError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database operation failed".to_string(),
                )
            }

            SettlementError::Notify(ref e) => {
                // Notification failures are logged, never financial failures
                tracing::error!("Notification error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Event publishing failed".to_string(),
                )
            }

            SettlementError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Helper type for Results in this application
pub type SettlementResult<T> = Result<T, SettlementError>;
