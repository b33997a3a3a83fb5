//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DatabaseError;
use crate::reminder::ReminderError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail.clone()),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{entity} {id} not found"))
            }
            DatabaseError::InvalidValue { field, value } => {
                ApiError::BadRequest(format!("Invalid value for {field}: {value}"))
            }
            DatabaseError::Conflict(detail) => ApiError::Conflict(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ReminderError> for ApiError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::RecordNotFound(id) => {
                ApiError::NotFound(format!("dose log {id} not found"))
            }
            ReminderError::InvalidAction(detail) => ApiError::BadRequest(detail),
            ReminderError::Database(db) => ApiError::from(db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_not_found_maps_to_404() {
        let err = ApiError::from(DatabaseError::NotFound {
            entity: "medication".to_string(),
            id: "m1".to_string(),
        });
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn database_conflict_maps_to_409() {
        let err = ApiError::from(DatabaseError::Conflict("race".to_string()));
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn reminder_errors_map_through() {
        assert!(matches!(
            ApiError::from(ReminderError::RecordNotFound("d1".to_string())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(ReminderError::InvalidAction("bad".to_string())),
            ApiError::BadRequest(_)
        ));
    }
}
