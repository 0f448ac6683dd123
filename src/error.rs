//! Error types for the price feed backend.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;


/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

/// Handshake authentication failures.
///
/// Every variant terminates the connection; none is retried server-side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No bearer credential was supplied.
    #[error("missing token")]
    MissingToken,

    /// The credential could not be decoded or its signature is wrong.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The credential is past its expiry.
    #[error("token expired")]
    Expired,

    /// The token subject is unknown or deactivated.
    #[error("inactive principal: {0}")]
    InactivePrincipal(String),

    /// The user directory could not be queried.
    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),

    /// The client did not complete the handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Failure to hand a frame to one connection's transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,

    /// The payload could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Failure to persist a market data point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The storage backend returned an error.
    #[error("database error: {0}")]
    Database(String),

    /// The record was refused (e.g., unknown instrument).
    #[error("record rejected: {0}")]
    Rejected(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Database(err.to_string())
    }
}

/// A directory collaborator (instruments or users) could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream unavailable: {0}")]
pub struct UpstreamUnavailable(pub String);

impl From<sqlx::Error> for UpstreamUnavailable {
    fn from(err: sqlx::Error) -> Self {
        UpstreamUnavailable(err.to_string())
    }
}

/// Room membership errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The connection is not (or no longer) registered.
    #[error("unknown connection")]
    UnknownConnection,

    /// The room name is empty or too long.
    #[error("invalid room name: {0:?}")]
    InvalidRoom(String),

    /// The connection already holds the maximum number of rooms.
    #[error("room limit of {0} reached")]
    RoomLimitExceeded(usize),
}

/// API error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A collaborator could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::UpstreamUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE")
            }
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<UpstreamUnavailable> for ApiError {
    fn from(err: UpstreamUnavailable) -> Self {
        ApiError::UpstreamUnavailable(err.0)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Database(msg) => ApiError::Database(msg),
            PersistenceError::Rejected(msg) => ApiError::InvalidRequest(msg),
        }
    }
}
