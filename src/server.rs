//!
//! authd HTTP server
//! -----------------
//! Axum-based transport for the authentication service.
//!
//! Responsibilities:
//! - Opening the configured persistence backend (provisioning tables when needed).
//! - Wiring credential store, session manager, authorization gate and service.
//! - Mounting the RPC dispatcher (`POST /{service}/{method}`) and a health check.
//! - Running the background reaper that deletes long-dead session rows.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::identity::{AuthGate, CredentialStore, PasswordHasherConfig, SessionManager, SystemClock};
use crate::storage::{Backend, SessionStore};

pub mod rpc;
pub mod service;

use service::AuthService;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub service: Arc<AuthService>,
}

impl AppState {
    pub fn new(backend: &Backend, cfg: &ServerConfig) -> anyhow::Result<Self> {
        let hasher = PasswordHasherConfig::new(cfg.hash_cost)?;
        let sessions = Arc::new(SessionManager::with_clock(
            backend.sessions.clone(),
            cfg.session_ttl,
            Arc::new(SystemClock),
        ));
        let credentials = CredentialStore::new(backend.users.clone(), hasher)?;
        Ok(Self {
            gate: Arc::new(AuthGate::new(sessions.clone())),
            service: Arc::new(AuthService::new(credentials, sessions)),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/{service}/{method}", post(rpc::rpc_handler))
        .with_state(state)
}

/// Periodically delete sessions whose expiry has passed. A non-positive interval disables it.
pub fn spawn_reaper(store: Arc<dyn SessionStore>, interval_sec: i64) -> Option<JoinHandle<()>> {
    if interval_sec <= 0 {
        info!("session_reaper" = false, "session reaper disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let period = Duration::from_secs(interval_sec as u64);
        loop {
            tokio::time::sleep(period).await;
            match store.reap_expired(chrono::Utc::now()).await {
                Ok(removed) if removed > 0 => debug!(removed = removed, "session_reap"),
                Ok(_) => {}
                Err(e) => warn!("session reaper failed: {}", e),
            }
        }
    }))
}

pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    let backend = Backend::open(&cfg)
        .await
        .with_context(|| format!("While opening {} backend", if cfg.database_url.is_some() { "postgres" } else { "memory" }))?;
    let state = AppState::new(&backend, &cfg).context("While building service state")?;

    let _reaper = spawn_reaper(backend.sessions.clone(), cfg.reap_interval_sec);

    let app = router(state);
    let addr: SocketAddr = cfg.listen_addr().parse().with_context(|| format!("invalid listen address {}", cfg.listen_addr()))?;
    info!(
        backend = backend.kind,
        session_ttl_secs = cfg.session_ttl.as_secs(),
        "Starting server on {}", addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point using configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    let cfg = ServerConfig::from_env()?;
    run_with_config(cfg).await
}
