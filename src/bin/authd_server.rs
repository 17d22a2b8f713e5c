//!
//! authd server binary
//! -------------------
//! Command-line entry point for the authentication service. Configuration comes
//! from `AUTHD_*` environment variables; the flags below override them.

use anyhow::{Context, Result};
use std::env;

use authd::config::ServerConfig;

fn parse_port_arg(args: &[String], flag: &str) -> Result<Option<u16>> {
    match arg_value(args, flag) {
        Some(v) => Ok(Some(v.parse::<u16>().with_context(|| format!("{} expects a port number, got '{}'", flag, v))?)),
        None => Ok(None),
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter, defaulting to info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("authd server\n\nUSAGE:\n  authd_server [--http-port N] [--bind ADDR] [--database-url DSN] [--memory]\n\nOPTIONS:\n  --http-port N         listen port (env: AUTHD_HTTP_PORT, default 50051)\n  --bind ADDR           listen address (env: AUTHD_BIND, default 0.0.0.0)\n  --database-url DSN    Postgres DSN (env: AUTHD_DATABASE_URL); unset means in-memory\n  --memory              ignore AUTHD_DATABASE_URL and keep everything in memory\n\nOther settings: AUTHD_SESSION_TTL_SECS, AUTHD_REAP_INTERVAL_SEC, AUTHD_PG_CONNECTIONS,\n                AUTHD_ARGON2_M, AUTHD_ARGON2_T, AUTHD_ARGON2_P\n");
        return Ok(());
    }

    let mut cfg = ServerConfig::from_env()?;

    // CLI arguments override environment
    if let Some(port) = parse_port_arg(&args, "--http-port")? { cfg.http_port = port; }
    if let Some(bind) = arg_value(&args, "--bind") { cfg.bind = bind; }
    if let Some(url) = arg_value(&args, "--database-url") { cfg.database_url = Some(url); }
    if has_flag(&args, "--memory") { cfg.database_url = None; }

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    tracing::info!(
        target: "authd",
        "authd starting: RUST_LOG='{}', listen={}, backend={}, session_ttl_secs={}, reap_interval_sec={}",
        rust_log,
        cfg.listen_addr(),
        if cfg.database_url.is_some() { "postgres" } else { "memory" },
        cfg.session_ttl.as_secs(),
        cfg.reap_interval_sec
    );

    authd::server::run_with_config(cfg).await
}
