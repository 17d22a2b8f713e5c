//! `auth.v1.AuthService` operations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AuthError, AuthResult};
use crate::identity::{CallContext, CredentialStore, SessionManager, SessionToken};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUserInfoResponse {
    pub user_id: String,
    pub username: String,
}

pub struct AuthService {
    credentials: CredentialStore,
    sessions: Arc<SessionManager>,
}

impl AuthService {
    pub fn new(credentials: CredentialStore, sessions: Arc<SessionManager>) -> Self {
        Self { credentials, sessions }
    }

    pub async fn register(&self, ctx: &CallContext, req: RegisterRequest) -> AuthResult<RegisterResponse> {
        if req.username.is_empty() || req.password.is_empty() {
            return Err(AuthError::invalid_argument("username and password are required"));
        }
        let user_id = self.credentials.create_user(&req.username, &req.password).await?;
        info!(target: "auth", %user_id, request_id = %ctx.request_id, "user registered");
        Ok(RegisterResponse { user_id: user_id.to_string() })
    }

    /// Returns the response body and the new session token, which travels as response metadata.
    pub async fn login(&self, ctx: &CallContext, req: LoginRequest) -> AuthResult<(LoginResponse, SessionToken)> {
        let user_id = self.credentials.verify_credentials(&req.username, &req.password).await?;
        let token = self.sessions.create_session(user_id).await?;
        info!(target: "auth", %user_id, request_id = %ctx.request_id, "login succeeded");
        Ok((LoginResponse { user_id: user_id.to_string() }, token))
    }

    pub async fn get_user_info(&self, ctx: &CallContext) -> AuthResult<GetUserInfoResponse> {
        let identity = ctx.require_identity()?;
        Ok(GetUserInfoResponse {
            user_id: identity.user_id.to_string(),
            username: identity.display_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashCost;
    use crate::identity::PasswordHasherConfig;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn service() -> AuthService {
        let mem = Arc::new(MemoryStore::new());
        let creds = CredentialStore::new(mem.clone(), PasswordHasherConfig::new(HashCost::cheap()).unwrap()).unwrap();
        let sessions = Arc::new(SessionManager::new(mem, Duration::from_secs(86400)));
        AuthService::new(creds, sessions)
    }

    fn creds(u: &str, p: &str) -> (RegisterRequest, LoginRequest) {
        (
            RegisterRequest { username: u.into(), password: p.into() },
            LoginRequest { username: u.into(), password: p.into() },
        )
    }

    #[tokio::test]
    async fn register_login_flow() {
        let svc = service();
        let ctx = CallContext::new("/auth.v1.AuthService/Register");
        let (reg, login) = creds("alice", "p@ss");
        assert_eq!(svc.register(&ctx, reg).await.unwrap().user_id, "1");
        let (resp, token) = svc.login(&ctx, login).await.unwrap();
        assert_eq!(resp.user_id, "1");
        assert_eq!(token.len(), 43);
    }

    #[tokio::test]
    async fn register_rejects_empty_fields_before_storage() {
        let svc = service();
        let ctx = CallContext::new("/auth.v1.AuthService/Register");
        let (reg, _) = creds("", "p");
        assert_eq!(svc.register(&ctx, reg).await.unwrap_err().code_str(), "INVALID_ARGUMENT");
        // the id sequence was not consumed
        let (reg, _) = creds("bob", "p");
        assert_eq!(svc.register(&ctx, reg).await.unwrap().user_id, "1");
    }

    #[tokio::test]
    async fn login_with_bad_password_is_unauthenticated() {
        let svc = service();
        let ctx = CallContext::new("/auth.v1.AuthService/Login");
        let (reg, _) = creds("alice", "p@ss");
        svc.register(&ctx, reg).await.unwrap();
        let (_, login) = creds("alice", "wrong");
        assert_eq!(svc.login(&ctx, login).await.unwrap_err().code_str(), "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn user_info_requires_identity_in_context() {
        let svc = service();
        let ctx = CallContext::new("/auth.v1.AuthService/GetUserInfo");
        let err = svc.get_user_info(&ctx).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("user not authenticated"));
    }
}
