use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{AuthError, AuthResult, StoreError};
use crate::storage::SessionStore;
use crate::tprintln;

use super::UserId;

pub type SessionToken = String;

/// Bytes of OS randomness per token (256 bits).
pub const TOKEN_BYTES: usize = 32;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self { Self { now: Arc::new(Mutex::new(start)) } }

    pub fn advance(&self, by: Duration) {
        let mut n = self.now.lock();
        *n += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> { *self.now.lock() }
}

fn gen_token() -> AuthResult<SessionToken> {
    let mut buf = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut buf).map_err(|e| {
        error!(target: "session", "os random source failed: {}", e);
        AuthError::internal("failed to create session")
    })?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Short, non-secret prefix of a token for log lines.
pub(crate) fn token_hint(token: &str) -> &str {
    token.get(..6).unwrap_or("")
}

/// Issues sessions and resolves tokens with a sliding expiry window.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self::with_clock(store, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn SessionStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self { store, ttl, clock }
    }

    /// Issue a fresh token for `user_id`, live for one TTL from now.
    pub async fn create_session(&self, user_id: UserId) -> AuthResult<SessionToken> {
        let token = gen_token()?;
        let expires_at = self.clock.now() + self.ttl;
        self.store.upsert_session(user_id, &token, expires_at).await.map_err(|e| {
            error!(target: "session", %user_id, "session insert failed: {}", e);
            AuthError::internal("failed to create session")
        })?;
        tprintln!("session.issue user={} sid={}.. ttl_secs={}", user_id, token_hint(&token), self.ttl.num_seconds());
        Ok(token)
    }

    /// Resolve a token to its owner and push its expiry out by one TTL.
    /// `Ok(None)` means absent or expired; only backend failures are errors.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        let now = self.clock.now();
        let new_expiry = now + self.ttl;
        let out = self.store.validate_and_refresh(token, now, new_expiry).await?;
        debug!(target: "session", sid = token_hint(token), resolved = out.is_some(), "session.resolve");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BrokenStore, MemoryStore, UserStore};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const HOUR: Duration = Duration::from_secs(60 * 60);

    async fn setup() -> (SessionManager, Arc<MemoryStore>, ManualClock, UserId) {
        let mem = Arc::new(MemoryStore::new());
        let user = mem.insert_user("alice", "hash").await.unwrap();
        let clock = ManualClock::new(Utc::now());
        let sm = SessionManager::with_clock(mem.clone(), DAY, Arc::new(clock.clone()));
        (sm, mem, clock, user)
    }

    #[test]
    fn tokens_are_url_safe_and_distinct() {
        let a = gen_token().unwrap();
        let b = gen_token().unwrap();
        assert_ne!(a, b);
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(token_hint(&a).len(), 6);
        assert_eq!(token_hint("ab"), "");
    }

    #[tokio::test]
    async fn create_then_resolve_returns_owner() {
        let (sm, mem, clock, user) = setup().await;
        let tok = sm.create_session(user).await.unwrap();
        assert_eq!(mem.lookup_session(&tok).await.unwrap().unwrap().expires_at, clock.now() + chrono::Duration::days(1));
        assert_eq!(sm.resolve_session(&tok).await.unwrap(), Some(user));
        assert_eq!(sm.resolve_session("not-a-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unused_session_dies_after_ttl() {
        let (sm, _, clock, user) = setup().await;
        let tok = sm.create_session(user).await.unwrap();
        clock.advance(DAY);
        assert_eq!(sm.resolve_session(&tok).await.unwrap(), None);
        // and stays dead: the failed resolve did not revive it
        clock.advance(Duration::from_secs(1));
        assert_eq!(sm.resolve_session(&tok).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sliding_window_keeps_regularly_used_session_alive() {
        let (sm, _, clock, user) = setup().await;
        let tok = sm.create_session(user).await.unwrap();
        for _ in 0..30 {
            clock.advance(23 * HOUR);
            assert_eq!(sm.resolve_session(&tok).await.unwrap(), Some(user));
        }
        clock.advance(DAY);
        assert_eq!(sm.resolve_session(&tok).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_keep_the_latest_expiry() {
        let mem = Arc::new(MemoryStore::new());
        let user = mem.insert_user("alice", "hash").await.unwrap();
        let start = Utc::now();
        let sm = SessionManager::with_clock(mem.clone(), DAY, Arc::new(ManualClock::new(start)));
        let tok = sm.create_session(user).await.unwrap();

        // Each task refreshes with its own notion of "now"; the one computed latest must win
        // no matter in which order they reach the row.
        let tasks: Vec<_> = (0..32i64)
            .rev()
            .map(|i| {
                let mem = mem.clone();
                let tok = tok.clone();
                tokio::spawn(async move {
                    let now = start + chrono::Duration::seconds(i);
                    mem.validate_and_refresh(&tok, now, now + chrono::Duration::days(1)).await
                })
            })
            .collect();
        for r in futures::future::join_all(tasks).await {
            assert_eq!(r.unwrap().unwrap(), Some(user));
        }
        let rec = mem.lookup_session(&tok).await.unwrap().unwrap();
        assert_eq!(rec.expires_at, start + chrono::Duration::seconds(31) + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn store_failures_surface_to_the_caller() {
        let sm = SessionManager::new(Arc::new(BrokenStore), DAY);
        assert_eq!(sm.create_session(UserId(1)).await.unwrap_err(), AuthError::internal("failed to create session"));
        assert!(sm.resolve_session("tok").await.is_err());
    }
}
