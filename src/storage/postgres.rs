//! PostgreSQL backend over tokio-postgres.
//!
//! A fixed set of connections is opened up front; each sits behind an async mutex
//! and is handed out to one operation at a time, so a transaction owns its
//! connection from BEGIN to COMMIT. Dropping a `Transaction` without committing
//! rolls it back, which covers early returns, errors and cancelled tasks alike.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error, warn};

use super::{SessionStore, UserCredentials, UserStore};
use crate::error::StoreError;
use crate::identity::UserId;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL
    );
    CREATE INDEX IF NOT EXISTS sessions_expiry_idx ON sessions (expires_at);
";

pub struct PgStore {
    cfg: Config,
    conns: Vec<Mutex<Client>>,
    next: AtomicUsize,
}

async fn open_client(cfg: &Config) -> Result<Client, StoreError> {
    let (client, connection) = cfg.connect(NoTls).await.map_err(|e| StoreError::Unavailable(e.to_string()))?;
    // drive the connection in background
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(target: "storage", "postgres connection error: {}", e);
        }
    });
    Ok(client)
}

impl PgStore {
    pub async fn connect(url: &str, size: usize) -> Result<Self, StoreError> {
        let cfg: Config = url.parse().map_err(|e: tokio_postgres::Error| StoreError::Unavailable(format!("invalid postgres url: {}", e)))?;
        Self::connect_with(cfg, size).await
    }

    /// Open `size` connections (at least one) with an already built client configuration.
    pub async fn connect_with(cfg: Config, size: usize) -> Result<Self, StoreError> {
        let mut conns = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            conns.push(Mutex::new(open_client(&cfg).await?));
        }
        Ok(Self { cfg, conns, next: AtomicUsize::new(0) })
    }

    /// Create the tables and the expiry index if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.acquire().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    /// Take an idle connection if there is one, otherwise queue on the next one in turn.
    /// A connection found closed is replaced before it is handed out.
    async fn acquire(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        let mut guard = match self.conns.iter().find_map(|c| c.try_lock().ok()) {
            Some(g) => g,
            None => {
                let i = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
                self.conns[i].lock().await
            }
        };
        if guard.is_closed() {
            warn!(target: "storage", "postgres connection closed; reconnecting");
            *guard = open_client(&self.cfg).await?;
        }
        Ok(guard)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, username: &str, password_hash: &str) -> Result<UserId, StoreError> {
        let client = self.acquire().await?;
        let row = client
            .query_one(
                "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id",
                &[&username, &password_hash],
            )
            .await?;
        // try_get: a pre-existing table with other column types is an error, not a panic
        Ok(UserId(row.try_get(0)?))
    }

    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, StoreError> {
        let client = self.acquire().await?;
        let row = client
            .query_opt("SELECT id, password_hash FROM users WHERE username = $1", &[&username])
            .await?;
        let Some(r) = row else { return Ok(None); };
        Ok(Some(UserCredentials { user_id: UserId(r.try_get(0)?), password_hash: r.try_get(1)? }))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn upsert_session(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let client = self.acquire().await?;
        client
            .execute(
                "INSERT INTO sessions (session_id, user_id, expires_at) VALUES ($1, $2, $3)
                 ON CONFLICT (session_id)
                 DO UPDATE SET user_id = EXCLUDED.user_id, expires_at = EXCLUDED.expires_at",
                &[&token, &user_id.0, &expires_at],
            )
            .await?;
        Ok(())
    }

    async fn validate_and_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        let mut client = self.acquire().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_opt(
                "SELECT user_id FROM sessions WHERE session_id = $1 AND expires_at > $2 FOR UPDATE",
                &[&token, &now],
            )
            .await?;
        // dropping tx rolls back
        let Some(row) = row else { return Ok(None); };
        let user_id: i64 = row.try_get(0)?;
        if let Err(e) = tx
            .execute(
                "UPDATE sessions SET expires_at = GREATEST(expires_at, $1) WHERE session_id = $2",
                &[&new_expiry, &token],
            )
            .await
        {
            warn!(target: "storage", user_id, "failed to refresh session: {}", e);
            return Err(e.into());
        }
        tx.commit().await?;
        debug!(target: "storage", user_id, "session refreshed");
        Ok(Some(UserId(user_id)))
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let client = self.acquire().await?;
        // SKIP LOCKED leaves rows that a refresh currently holds for the next round.
        let n = client
            .execute(
                "DELETE FROM sessions WHERE session_id IN (
                     SELECT session_id FROM sessions WHERE expires_at <= $1 FOR UPDATE SKIP LOCKED
                 )",
                &[&now],
            )
            .await?;
        Ok(n as usize)
    }
}
