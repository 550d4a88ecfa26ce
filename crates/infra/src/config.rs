//! Process configuration, read from environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BIND_ADDR` | `0.0.0.0:5000` | HTTP listen address |
//! | `DATABASE_URL` | unset: in-memory | `sqlite:...` or `postgres://...` |
//! | `DB_MAX_CONNECTIONS` | `5` | pool size for relational stores |
//! | `MIRROR_DOCUMENT_URL` | unset | document-style mirror base URL |
//! | `MIRROR_REST_URL` | unset | PostgREST-style mirror base URL |
//! | `MIRROR_API_KEY` | unset | key sent to both mirrors |
//! | `REPLICATION_MAX_BACKOFF_SECS` | `300` | retry delay cap per mirror |
//! | `SEED_DEMO_ITEMS` | `false` | seed "Item A"/"Item B" into an empty store |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::mirror::HttpDialect;
use crate::replication::ReplicationWorkerConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("DATABASE_URL scheme not supported: {0:?} (expected sqlite: or postgres://)")]
    UnsupportedDatabase(String),
}

/// Where inventory records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    InMemory,
    Sqlite(String),
    Postgres(String),
}

impl DatabaseBackend {
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if url.starts_with("sqlite:") {
            Ok(DatabaseBackend::Sqlite(url.to_string()))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseBackend::Postgres(url.to_string()))
        } else {
            Err(ConfigError::UnsupportedDatabase(url.to_string()))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DatabaseBackend::InMemory => "in_memory",
            DatabaseBackend::Sqlite(_) => "sqlite",
            DatabaseBackend::Postgres(_) => "postgres",
        }
    }
}

/// One HTTP mirror to replicate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub name: String,
    pub url: String,
    pub dialect: HttpDialect,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database: DatabaseBackend,
    pub max_connections: u32,
    pub mirrors: Vec<MirrorTarget>,
    pub replication: ReplicationWorkerConfig,
    pub seed_demo_items: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => parse_var("BIND_ADDR", &v)?,
            None => parse_var("BIND_ADDR", DEFAULT_BIND_ADDR)?,
        };

        let database = match get("DATABASE_URL") {
            Some(url) => DatabaseBackend::from_url(&url)?,
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory store");
                DatabaseBackend::InMemory
            }
        };

        let max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => {
                let n: u32 = parse_var("DB_MAX_CONNECTIONS", &v)?;
                if n == 0 {
                    return Err(invalid("DB_MAX_CONNECTIONS", &v, "must be at least 1"));
                }
                n
            }
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let api_key = get("MIRROR_API_KEY");
        let mut mirrors = Vec::new();
        if let Some(url) = get("MIRROR_DOCUMENT_URL") {
            mirrors.push(MirrorTarget {
                name: "document".to_string(),
                url,
                dialect: HttpDialect::Document,
                api_key: api_key.clone(),
            });
        }
        if let Some(url) = get("MIRROR_REST_URL") {
            mirrors.push(MirrorTarget {
                name: "rest".to_string(),
                url,
                dialect: HttpDialect::Rest,
                api_key: api_key.clone(),
            });
        }

        let mut replication = ReplicationWorkerConfig::default();
        if let Some(v) = get("REPLICATION_MAX_BACKOFF_SECS") {
            let secs: u64 = parse_var("REPLICATION_MAX_BACKOFF_SECS", &v)?;
            if secs == 0 {
                return Err(invalid("REPLICATION_MAX_BACKOFF_SECS", &v, "must be at least 1"));
            }
            replication.max_backoff = Duration::from_secs(secs);
            replication.initial_backoff = replication.initial_backoff.min(replication.max_backoff);
        }

        let seed_demo_items = match get("SEED_DEMO_ITEMS") {
            Some(v) => parse_flag("SEED_DEMO_ITEMS", &v)?,
            None => false,
        };

        Ok(Self {
            bind_addr,
            database,
            max_connections,
            mirrors,
            replication,
            seed_demo_items,
        })
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value, &e.to_string()))
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected true or false")),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
