//! User registration and password verification.
//!
//! Hashes are Argon2id PHC strings produced with one fixed cost for the whole
//! process. Hashing and verification run on the blocking pool so a slow hash
//! never holds up unrelated calls.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};
use tracing::{error, warn};

use crate::config::HashCost;
use crate::error::{AuthError, AuthResult, StoreError};
use crate::storage::UserStore;

use super::UserId;

const BAD_CREDENTIALS: &str = "invalid username or password";
const REGISTER_FAILED: &str = "failed to register user";
const VERIFY_FAILED: &str = "failed to verify credentials";

#[derive(Clone)]
pub struct PasswordHasherConfig {
    argon2: Argon2<'static>,
}

impl PasswordHasherConfig {
    pub fn new(cost: HashCost) -> anyhow::Result<Self> {
        let params = Params::new(cost.m_cost, cost.t_cost, cost.p_cost, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 cost: {}", e))?;
        Ok(Self { argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params) })
    }

    fn hash(&self, password: &str) -> anyhow::Result<String> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let phc = self.argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow::anyhow!(e.to_string()))?.to_string();
        Ok(phc)
    }

    /// Constant-time comparison happens inside argon2's verifier.
    fn verify(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                warn!(target: "auth", "stored password hash is not a valid PHC string: {}", e);
                false
            }
        }
    }
}

/// Run hashing work on the blocking pool. A task that panics or is cancelled
/// comes back as `Internal(failure)`.
async fn on_blocking_pool<T, F>(failure: &'static str, work: F) -> AuthResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!(target: "auth", "password hashing task failed: {}", e);
        AuthError::internal(failure)
    })
}

pub struct CredentialStore {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasherConfig,
    // Checked against when the username is unknown, so both misses cost one verification.
    dummy_hash: Arc<str>,
}

impl CredentialStore {
    /// Builds the unknown-user dummy hash up front, so the first miss costs the same as any other.
    pub fn new(users: Arc<dyn UserStore>, hasher: PasswordHasherConfig) -> anyhow::Result<Self> {
        let dummy_hash = hasher.hash("authd-dummy-password")?;
        Ok(Self { users, hasher, dummy_hash: Arc::from(dummy_hash) })
    }

    pub async fn create_user(&self, username: &str, password: &str) -> AuthResult<UserId> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::invalid_argument("username and password are required"));
        }
        let hasher = self.hasher.clone();
        let pw = password.to_string();
        let hash = on_blocking_pool(REGISTER_FAILED, move || hasher.hash(&pw)).await?.map_err(|e| {
            error!(target: "auth", "password hashing failed: {}", e);
            AuthError::internal(REGISTER_FAILED)
        })?;

        match self.users.insert_user(username, &hash).await {
            Ok(id) => Ok(id),
            Err(StoreError::UniqueViolation { .. }) => Err(AuthError::already_exists("username already exists")),
            Err(e) => {
                error!(target: "auth", "user insert failed: {}", e);
                Err(AuthError::internal(REGISTER_FAILED))
            }
        }
    }

    /// Unknown user and wrong password are the same `Unauthenticated` outcome.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> AuthResult<UserId> {
        let found = self.users.find_credentials(username).await.map_err(|e| {
            error!(target: "auth", "credential lookup failed: {}", e);
            AuthError::internal(VERIFY_FAILED)
        })?;

        let hasher = self.hasher.clone();
        let pw = password.to_string();
        let hash = match &found {
            Some(c) => Arc::from(c.password_hash.as_str()),
            None => self.dummy_hash.clone(),
        };
        let matched = on_blocking_pool(VERIFY_FAILED, move || hasher.verify(&hash, &pw)).await?;

        match found {
            Some(c) if matched => Ok(c.user_id),
            _ => Err(AuthError::unauthenticated(BAD_CREDENTIALS)),
        }
    }
}
