//! Per-call authorization gate.
//!
//! Every inbound call is classified by its full method name. Public calls run
//! untouched. Protected calls must present a `session-id` metadata entry that
//! resolves to a live session; resolving it also slides the session's expiry,
//! so authorizing a call and renewing the session are one step.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{AuthError, AuthResult};

use super::request_context::{CallContext, Metadata};
use super::session::{token_hint, SessionManager};
use super::Identity;

/// Metadata key carrying the session token, inbound on protected calls and outbound on Login.
pub const SESSION_METADATA_KEY: &str = "session-id";

pub const REGISTER_METHOD: &str = "/auth.v1.AuthService/Register";
pub const LOGIN_METHOD: &str = "/auth.v1.AuthService/Login";
pub const REFLECTION_V1ALPHA_METHOD: &str = "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo";
pub const REFLECTION_V1_METHOD: &str = "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo";
pub const REFLECTION_V1ALPHA_LIST_METHOD: &str = "/grpc.reflection.v1alpha.ServerReflection/ListServices";
pub const REFLECTION_V1_LIST_METHOD: &str = "/grpc.reflection.v1.ServerReflection/ListServices";

/// Calls that need no session. Closed list: adding a public operation means adding it here.
pub const PUBLIC_METHODS: &[&str] = &[
    REGISTER_METHOD,
    LOGIN_METHOD,
    REFLECTION_V1ALPHA_METHOD,
    REFLECTION_V1_METHOD,
    REFLECTION_V1ALPHA_LIST_METHOD,
    REFLECTION_V1_LIST_METHOD,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    Public,
    Protected,
}

pub fn classify(method: &str) -> MethodClass {
    if PUBLIC_METHODS.contains(&method) { MethodClass::Public } else { MethodClass::Protected }
}

pub struct AuthGate {
    sessions: Arc<SessionManager>,
}

impl AuthGate {
    pub fn new(sessions: Arc<SessionManager>) -> Self { Self { sessions } }

    /// Decide whether the call may proceed; on success the returned context
    /// carries the caller's identity for protected calls.
    pub async fn authorize(&self, ctx: CallContext, metadata: Option<&Metadata>) -> AuthResult<CallContext> {
        if classify(&ctx.method) == MethodClass::Public {
            return Ok(ctx);
        }
        let Some(md) = metadata else {
            return Err(AuthError::unauthenticated("missing metadata"));
        };
        let Some(token) = md.get(SESSION_METADATA_KEY).filter(|t| !t.is_empty()) else {
            return Err(AuthError::unauthenticated("missing session id"));
        };
        match self.sessions.resolve_session(token).await {
            Ok(Some(user_id)) => {
                debug!(target: "gate", method = %ctx.method, %user_id, request_id = %ctx.request_id, "call authorized");
                Ok(ctx.with_identity(Identity::new(user_id)))
            }
            Ok(None) => {
                debug!(target: "gate", method = %ctx.method, sid = token_hint(token), "invalid or expired session");
                Err(AuthError::unauthenticated("invalid or expired session"))
            }
            Err(e) => {
                error!(target: "gate", method = %ctx.method, "session verification failed: {}", e);
                Err(AuthError::internal("session verification failed"))
            }
        }
    }

    /// Authorize, then run `handler` with the resulting context and hand back
    /// whatever it returns.
    pub async fn intercept<F, Fut, T>(&self, ctx: CallContext, metadata: Option<&Metadata>, handler: F) -> AuthResult<T>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let ctx = self.authorize(ctx, metadata).await?;
        handler(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ManualClock, UserId};
    use crate::storage::{BrokenStore, MemoryStore, UserStore};
    use chrono::Utc;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(86400);
    const USER_INFO: &str = "/auth.v1.AuthService/GetUserInfo";

    async fn gate() -> (AuthGate, Arc<SessionManager>, Arc<MemoryStore>, ManualClock, UserId) {
        let mem = Arc::new(MemoryStore::new());
        let user = mem.insert_user("alice", "h").await.unwrap();
        let clock = ManualClock::new(Utc::now());
        let sm = Arc::new(SessionManager::with_clock(mem.clone(), DAY, Arc::new(clock.clone())));
        (AuthGate::new(sm.clone()), sm, mem, clock, user)
    }

    fn md_with(token: &str) -> Metadata {
        [(SESSION_METADATA_KEY, token)].into_iter().collect()
    }

    #[test]
    fn classification_is_exact() {
        assert_eq!(classify(REGISTER_METHOD), MethodClass::Public);
        assert_eq!(classify(LOGIN_METHOD), MethodClass::Public);
        assert_eq!(classify(REFLECTION_V1ALPHA_METHOD), MethodClass::Public);
        assert_eq!(classify(REFLECTION_V1_METHOD), MethodClass::Public);
        assert_eq!(classify(REFLECTION_V1ALPHA_LIST_METHOD), MethodClass::Public);
        assert_eq!(classify(REFLECTION_V1_LIST_METHOD), MethodClass::Public);
        assert_eq!(classify("/grpc.reflection.v1alpha.ServerReflection/Anything"), MethodClass::Protected);
        assert_eq!(classify(USER_INFO), MethodClass::Protected);
        // near misses stay protected
        assert_eq!(classify("/auth.v1.AuthService/login"), MethodClass::Protected);
        assert_eq!(classify("/auth.v1.AuthService/Register/"), MethodClass::Protected);
        assert_eq!(classify("/evil.ServerReflectionService/Anything"), MethodClass::Protected);
    }

    #[tokio::test]
    async fn public_calls_pass_without_token() {
        let (g, ..) = gate().await;
        let ctx = g.authorize(CallContext::new(REGISTER_METHOD), None).await.unwrap();
        assert!(ctx.identity().is_none());
        let ctx = g.authorize(CallContext::new(REFLECTION_V1ALPHA_METHOD), Some(&Metadata::new())).await.unwrap();
        assert!(ctx.identity().is_none());
    }

    #[tokio::test]
    async fn protected_calls_without_token_are_rejected() {
        let (g, ..) = gate().await;
        let err = g.authorize(CallContext::new(USER_INFO), None).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("missing metadata"));
        let err = g.authorize(CallContext::new(USER_INFO), Some(&Metadata::new())).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("missing session id"));
        let err = g.authorize(CallContext::new(USER_INFO), Some(&md_with(""))).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("missing session id"));
    }

    #[tokio::test]
    async fn unknown_and_expired_tokens_are_unauthenticated() {
        let (g, sm, _, clock, user) = gate().await;
        let err = g.authorize(CallContext::new(USER_INFO), Some(&md_with("bogus"))).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("invalid or expired session"));

        let tok = sm.create_session(user).await.unwrap();
        clock.advance(DAY + Duration::from_secs(1));
        let err = g.authorize(CallContext::new(USER_INFO), Some(&md_with(&tok))).await.unwrap_err();
        assert_eq!(err, AuthError::unauthenticated("invalid or expired session"));
    }

    #[tokio::test]
    async fn valid_token_injects_identity_and_extends_session() {
        let (g, sm, mem, clock, user) = gate().await;
        let tok = sm.create_session(user).await.unwrap();
        let issued = mem.lookup_session(&tok).await.unwrap().unwrap().expires_at;

        clock.advance(Duration::from_secs(3600));
        let out = g
            .intercept(CallContext::new(USER_INFO), Some(&md_with(&tok)), |ctx| async move {
                Ok(ctx.require_identity()?.user_id)
            })
            .await
            .unwrap();
        assert_eq!(out, user);
        let refreshed = mem.lookup_session(&tok).await.unwrap().unwrap().expires_at;
        assert_eq!(refreshed - issued, chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn handler_errors_pass_through_unchanged() {
        let (g, sm, _, _, user) = gate().await;
        let tok = sm.create_session(user).await.unwrap();
        let err = g
            .intercept(CallContext::new(USER_INFO), Some(&md_with(&tok)), |_ctx| async move {
                Err::<(), _>(AuthError::invalid_argument("handler said no"))
            })
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::invalid_argument("handler said no"));
    }

    #[tokio::test]
    async fn handler_is_not_run_when_gate_rejects() {
        let (g, ..) = gate().await;
        let mut ran = false;
        let _ = g
            .intercept(CallContext::new(USER_INFO), Some(&Metadata::new()), |_ctx| {
                ran = true;
                async move { Ok(()) }
            })
            .await;
        assert!(!ran);
    }

    #[tokio::test]
    async fn store_failure_is_internal() {
        let sm = Arc::new(SessionManager::new(Arc::new(BrokenStore), DAY));
        let g = AuthGate::new(sm);
        let err = g.authorize(CallContext::new(USER_INFO), Some(&md_with("tok"))).await.unwrap_err();
        assert_eq!(err, AuthError::internal("session verification failed"));
    }
}
