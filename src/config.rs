//! Process configuration, read once from the environment at startup.
//!
//! Every value here is fixed for the lifetime of the process: the session TTL and
//! the Argon2 cost in particular must not change between issuing and validating.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_HTTP_PORT: u16 = 50051;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_REAP_INTERVAL_SEC: i64 = 300;
pub const DEFAULT_PG_CONNECTIONS: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid { name: &'static str, value: String, reason: String },
}

/// Argon2id cost parameters (memory KiB, iterations, lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self { m_cost: 19456, t_cost: 2, p_cost: 1 }
    }
}

impl HashCost {
    /// Minimal cost accepted by argon2; only meant for tests.
    pub fn cheap() -> Self {
        Self { m_cost: 8, t_cost: 1, p_cost: 1 }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    /// Postgres DSN. `None` selects the in-memory backend.
    pub database_url: Option<String>,
    pub pg_connections: usize,
    pub session_ttl: Duration,
    /// Reaper period in seconds; zero or negative disables the reaper.
    pub reap_interval_sec: i64,
    pub hash_cost: HashCost,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            database_url: None,
            pg_connections: DEFAULT_PG_CONNECTIONS,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            reap_interval_sec: DEFAULT_REAP_INTERVAL_SEC,
            hash_cost: HashCost::default(),
        }
    }
}

fn parse_env<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => v.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            name,
            value: v.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = ServerConfig::default();
        let base = HashCost::default();

        let ttl_secs: u64 = parse_env("AUTHD_SESSION_TTL_SECS")?.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "AUTHD_SESSION_TTL_SECS",
                value: "0".into(),
                reason: "session ttl must be positive".into(),
            });
        }
        let pg_connections: usize = parse_env("AUTHD_PG_CONNECTIONS")?.unwrap_or(d.pg_connections);
        if pg_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "AUTHD_PG_CONNECTIONS",
                value: "0".into(),
                reason: "at least one connection is required".into(),
            });
        }

        Ok(Self {
            bind: env::var("AUTHD_BIND").ok().filter(|s| !s.trim().is_empty()).unwrap_or(d.bind),
            http_port: parse_env("AUTHD_HTTP_PORT")?.unwrap_or(d.http_port),
            database_url: env::var("AUTHD_DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            pg_connections,
            session_ttl: Duration::from_secs(ttl_secs),
            reap_interval_sec: parse_env("AUTHD_REAP_INTERVAL_SEC")?.unwrap_or(d.reap_interval_sec),
            hash_cost: HashCost {
                m_cost: parse_env("AUTHD_ARGON2_M")?.unwrap_or(base.m_cost),
                t_cost: parse_env("AUTHD_ARGON2_T")?.unwrap_or(base.t_cost),
                p_cost: parse_env("AUTHD_ARGON2_P")?.unwrap_or(base.p_cost),
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServerConfig::default();
        assert_eq!(c.http_port, 50051);
        assert_eq!(c.session_ttl, Duration::from_secs(86400));
        assert!(c.database_url.is_none());
        assert_eq!(c.hash_cost, HashCost { m_cost: 19456, t_cost: 2, p_cost: 1 });
        assert_eq!(c.listen_addr(), "0.0.0.0:50051");
    }

    // Only touches a variable no other test reads.
    #[test]
    fn parse_env_reports_bad_values() {
        std::env::set_var("AUTHD_TEST_ONLY_NUMBER", "abc");
        let r: Result<Option<u16>, _> = parse_env("AUTHD_TEST_ONLY_NUMBER");
        let err = r.unwrap_err().to_string();
        assert!(err.contains("AUTHD_TEST_ONLY_NUMBER"), "{err}");
        std::env::set_var("AUTHD_TEST_ONLY_NUMBER", " 42 ");
        let r: Option<u16> = parse_env("AUTHD_TEST_ONLY_NUMBER").unwrap();
        assert_eq!(r, Some(42));
        std::env::remove_var("AUTHD_TEST_ONLY_NUMBER");
        let r: Option<u16> = parse_env("AUTHD_TEST_ONLY_NUMBER").unwrap();
        assert_eq!(r, None);
    }
}
