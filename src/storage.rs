//!
//! authd storage module
//! --------------------
//! Relational persistence for the two tables the service owns:
//!
//! - `users(id, username UNIQUE, password_hash, created_at)`
//! - `sessions(session_id PRIMARY KEY, user_id REFERENCES users ON DELETE CASCADE, expires_at)`
//!
//! Callers only ever see the `UserStore` and `SessionStore` traits. Two backends
//! implement them: `postgres::PgStore` for deployments and `memory::MemoryStore`
//! for single-process use and tests. Both give the same guarantees: username
//! uniqueness is enforced by the insert itself, a session upsert is one atomic
//! write, and `validate_and_refresh` runs its read-check-write under an exclusive
//! lock scoped to that one session row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::StoreError;
use crate::identity::UserId;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Stored credentials for one user, as read back for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user and return its new id. A taken username surfaces as
    /// `StoreError::UniqueViolation` from the insert itself.
    async fn insert_user(&self, username: &str, password_hash: &str) -> Result<UserId, StoreError>;

    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert the session, or overwrite owner and expiry of an existing token, in one write.
    async fn upsert_session(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Lock the session row, check `expires_at > now`, and if live advance the
    /// expiry to `new_expiry` (never backwards). Absent and expired tokens yield
    /// `Ok(None)` and leave the row untouched.
    async fn validate_and_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError>;

    /// Physically delete rows whose expiry is at or before `now`. Returns the number removed.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// The pair of store handles the service runs on. Both usually point at the same backend.
#[derive(Clone)]
pub struct Backend {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub kind: &'static str,
}

impl Backend {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self { users: store.clone(), sessions: store, kind: "memory" }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self { users: store.clone(), sessions: store, kind: "postgres" }
    }

    /// Open the backend selected by the configuration, provisioning tables when needed.
    pub async fn open(cfg: &ServerConfig) -> Result<Self, StoreError> {
        match cfg.database_url.as_deref() {
            Some(url) => {
                let store = PgStore::connect(url, cfg.pg_connections).await?;
                store.ensure_schema().await?;
                info!(target: "storage", connections = cfg.pg_connections, "postgres backend ready");
                Ok(Self::postgres(store))
            }
            None => {
                info!(target: "storage", "AUTHD_DATABASE_URL unset; using in-memory backend");
                Ok(Self::memory())
            }
        }
    }
}

/// Store that fails every call; used to exercise the error-classification paths.
#[cfg(test)]
pub(crate) struct BrokenStore;

#[cfg(test)]
#[async_trait]
impl UserStore for BrokenStore {
    async fn insert_user(&self, _username: &str, _password_hash: &str) -> Result<UserId, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn find_credentials(&self, _username: &str) -> Result<Option<UserCredentials>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[cfg(test)]
#[async_trait]
impl SessionStore for BrokenStore {
    async fn upsert_session(&self, _user_id: UserId, _token: &str, _expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }
    async fn validate_and_refresh(&self, _token: &str, _now: DateTime<Utc>, _new_expiry: DateTime<Utc>) -> Result<Option<UserId>, StoreError> {
        Err(StoreError::Backend("deadlock detected".into()))
    }
    async fn reap_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(StoreError::Backend("deadlock detected".into()))
    }
}
