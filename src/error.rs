//! Caller-visible error taxonomy and the persistence error it is classified from.
//!
//! `StoreError` never leaves the crate boundary as-is: the credential store, the
//! session manager and the authorization gate translate it into `AuthError`, and
//! only `AuthError` is rendered onto the wire (HTTP status, gRPC code, JSON body).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "code", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthError {
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),
    #[error("ALREADY_EXISTS: {0}")]
    AlreadyExists(String),
    #[error("UNAUTHENTICATED: {0}")]
    Unauthenticated(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
    /// Unknown method; raised by the dispatcher before any handler or gate runs.
    #[error("UNIMPLEMENTED: {0}")]
    Unimplemented(String),
}

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AuthError::AlreadyExists(_) => "ALREADY_EXISTS",
            AuthError::Unauthenticated(_) => "UNAUTHENTICATED",
            AuthError::Internal(_) => "INTERNAL",
            AuthError::Unimplemented(_) => "UNIMPLEMENTED",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::InvalidArgument(m)
            | AuthError::AlreadyExists(m)
            | AuthError::Unauthenticated(m)
            | AuthError::Internal(m)
            | AuthError::Unimplemented(m) => m.as_str(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self { AuthError::InvalidArgument(msg.into()) }
    pub fn already_exists<S: Into<String>>(msg: S) -> Self { AuthError::AlreadyExists(msg.into()) }
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self { AuthError::Unauthenticated(msg.into()) }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AuthError::Internal(msg.into()) }
    pub fn unimplemented<S: Into<String>>(msg: S) -> Self { AuthError::Unimplemented(msg.into()) }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::InvalidArgument(_) => 400,
            AuthError::AlreadyExists(_) => 409,
            AuthError::Unauthenticated(_) => 401,
            AuthError::Internal(_) => 500,
            AuthError::Unimplemented(_) => 404,
        }
    }

    /// Numeric gRPC status code, sent in the `grpc-status` response header.
    pub fn grpc_code(&self) -> u8 {
        match self {
            AuthError::InvalidArgument(_) => 3,
            AuthError::AlreadyExists(_) => 6,
            AuthError::Unauthenticated(_) => 16,
            AuthError::Internal(_) => 13,
            AuthError::Unimplemented(_) => 12,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Failure reported by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            if db.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                return StoreError::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                };
            }
            return StoreError::Backend(db.message().to_string());
        }
        if err.is_closed() {
            return StoreError::Unavailable(err.to_string());
        }
        StoreError::Backend(err.to_string())
    }
}
