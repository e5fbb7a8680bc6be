//! Error taxonomy for the KMS core service plane.
//!
//! Every fallible operation in this crate returns `Result<T, KmsError>`. The
//! variant set is a closed taxonomy of *kinds*; callers and the axum
//! frontend only ever need to branch on the kind, never on a cause string.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Any JWE/JWS verification or barrier-unwrap failure. Deliberately
    /// opaque — never reveals which tier, algorithm, or check failed first,
    /// so it cannot be used as an oracle (scenario S5).
    #[error("decryption failed")]
    Integrity,

    #[error("barrier is sealed")]
    Sealed,

    /// Deadlock, timeout, or a full generator queue. Retried internally by
    /// the layer closest to the cause; only surfaced once retries are
    /// exhausted.
    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("internal error")]
    Internal,
}

impl KmsError {
    pub const fn kind(&self) -> &'static str {
        match self {
            KmsError::InvalidInput(_) => "invalid_input",
            KmsError::NotFound(_) => "not_found",
            KmsError::InvalidState(_) => "invalid_state",
            KmsError::Unauthorized => "unauthorized",
            KmsError::Conflict(_) => "conflict",
            KmsError::Integrity => "integrity",
            KmsError::Sealed => "sealed",
            KmsError::Transient(_) => "transient",
            KmsError::Internal => "internal",
        }
    }

    /// True for the kinds the persistence layer is allowed to retry at its
    /// own boundary. Nothing above `Transient` is retried automatically.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, KmsError::Transient(_))
    }
}

impl From<sqlx::Error> for KmsError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => KmsError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                KmsError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => KmsError::Transient("pool exhausted".to_string()),
            sqlx::Error::Io(_) => KmsError::Transient(err.to_string()),
            other => {
                tracing::error!(error = %other, "unmapped database error");
                KmsError::Internal
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for KmsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            KmsError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            KmsError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            KmsError::InvalidState(m) => (StatusCode::CONFLICT, m.clone()),
            KmsError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            KmsError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            KmsError::Integrity => (StatusCode::BAD_REQUEST, "decryption failed".to_string()),
            KmsError::Sealed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "barrier is sealed".to_string(),
            ),
            KmsError::Transient(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily unavailable".to_string(),
            ),
            KmsError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.kind().to_uppercase(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_message_is_opaque() {
        assert_eq!(KmsError::Integrity.to_string(), "decryption failed");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(KmsError::Transient("x".into()).is_retryable());
        assert!(!KmsError::Internal.is_retryable());
        assert!(!KmsError::Integrity.is_retryable());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: KmsError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "not_found");
    }
}
