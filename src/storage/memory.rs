//! In-process relational store.
//!
//! The users table is a single map behind a short-held mutex: inserts check the
//! username index and assign the next id under the same guard, so uniqueness holds
//! without a separate pre-check. Session rows each sit behind their own async
//! mutex; the table lock is only taken to find, insert or drop a row handle, never
//! across a read-check-write. Two refreshes on one token serialize on the row,
//! refreshes on different tokens do not touch each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{SessionStore, UserCredentials, UserStore};
use crate::error::StoreError;
use crate::identity::UserId;

#[derive(Debug, Clone)]
struct UserRow {
    id: UserId,
    password_hash: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct UsersTable {
    last_id: i64,
    by_name: HashMap<String, UserRow>,
    ids: HashSet<UserId>,
}

#[derive(Debug)]
struct SessionRow {
    user_id: UserId,
    expires_at: DateTime<Utc>,
    // Cleared when the reaper unlinks the row; a writer holding a stale handle retries.
    live: bool,
}

type RowHandle = Arc<tokio::sync::Mutex<SessionRow>>;

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<UsersTable>,
    sessions: RwLock<HashMap<String, RowHandle>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn user_exists(&self, id: UserId) -> bool {
        self.users.lock().ids.contains(&id)
    }

    fn row(&self, token: &str) -> Option<RowHandle> {
        self.sessions.read().get(token).cloned()
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize { self.sessions.read().len() }

    /// Current owner and expiry of a live row, read under the row lock.
    #[cfg(test)]
    pub(crate) async fn lookup_session(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let Some(handle) = self.row(token) else { return Ok(None); };
        let row = handle.lock().await;
        if !row.live { return Ok(None); }
        Ok(Some(SessionRecord { user_id: row.user_id, expires_at: row.expires_at }))
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionRecord {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, username: &str, password_hash: &str) -> Result<UserId, StoreError> {
        let mut t = self.users.lock();
        if t.by_name.contains_key(username) {
            return Err(StoreError::UniqueViolation { constraint: "users_username_key".into() });
        }
        t.last_id += 1;
        let id = UserId(t.last_id);
        t.ids.insert(id);
        t.by_name.insert(
            username.to_string(),
            UserRow { id, password_hash: password_hash.to_string(), created_at: Utc::now() },
        );
        Ok(id)
    }

    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, StoreError> {
        Ok(self.users.lock().by_name.get(username).map(|u| UserCredentials {
            user_id: u.id,
            password_hash: u.password_hash.clone(),
        }))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_session(&self, user_id: UserId, token: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        if !self.user_exists(user_id) {
            return Err(StoreError::Backend(format!("sessions.user_id references missing user {}", user_id)));
        }
        loop {
            let handle = {
                let mut map = self.sessions.write();
                map.entry(token.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(SessionRow { user_id, expires_at, live: true })))
                    .clone()
            };
            let mut row = handle.lock().await;
            if !row.live { continue; }
            row.user_id = user_id;
            row.expires_at = expires_at;
            return Ok(());
        }
    }

    async fn validate_and_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        let Some(handle) = self.row(token) else { return Ok(None); };
        let mut row = handle.lock().await;
        if !row.live || row.expires_at <= now {
            return Ok(None);
        }
        if new_expiry > row.expires_at {
            row.expires_at = new_expiry;
        }
        Ok(Some(row.user_id))
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut map = self.sessions.write();
        let mut removed = 0;
        map.retain(|_, handle| {
            // A row somebody is working on right now is not reaped this round.
            let Ok(mut row) = handle.try_lock() else { return true; };
            if row.expires_at <= now {
                row.live = false;
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
