//! qube configuration: TOML file with environment variable overrides,
//! mirroring the teacher's `fc-config` crate shape.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root configuration for a qube node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QubeConfig {
    /// Store connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub redis_url: String,

    /// Minimum warm connections kept open in the store pool.
    pub pool_min: usize,

    /// Maximum connections the store pool may hold.
    pub pool_max: usize,

    /// Grace period (ms) a worker stays alive with no jobs before stopping.
    pub inactivity_timeout_ms: u64,

    /// Sleep (ms) between empty-dequeue polls of a group.
    pub poll_interval_ms: u64,

    /// Pub/sub channel used to notify nodes of new jobs.
    pub notify_channel: String,

    /// Key prefix for all store-side entities (`{prefix}:{queue}:...`).
    pub key_prefix: String,
}

impl Default for QubeConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_min: 2,
            pool_max: 1000,
            inactivity_timeout_ms: 2000,
            poll_interval_ms: 1000,
            notify_channel: "QUEUE:NEWJOB".to_string(),
            key_prefix: "qube".to_string(),
        }
    }
}

impl QubeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: QubeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_min > self.pool_max {
            return Err(ConfigError::ValidationError(format!(
                "pool_min ({}) exceeds pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        if self.pool_max == 0 {
            return Err(ConfigError::ValidationError(
                "pool_max must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Derive a store credential tuple from `redis_url` for callers that
    /// want `{host, port, password, db}` instead of a connection string
    /// (spec.md §6's `construct(credentials)` contract).
    pub fn credentials(&self) -> StoreCredentials {
        StoreCredentials::parse(&self.redis_url)
    }
}

/// `{host, port, password, db}` as named in spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
}

impl StoreCredentials {
    pub fn parse(redis_url: &str) -> Self {
        let rest = redis_url
            .strip_prefix("redis://")
            .or_else(|| redis_url.strip_prefix("rediss://"))
            .unwrap_or(redis_url);

        let (auth, rest) = match rest.split_once('@') {
            Some((auth, rest)) => (Some(auth), rest),
            None => (None, rest),
        };
        let password = auth.and_then(|a| a.split_once(':').map(|(_, p)| p.to_string()));

        let (hostport, db) = match rest.split_once('/') {
            Some((hostport, db)) => (hostport, db.parse().unwrap_or(0)),
            None => (rest, 0),
        };
        let (host, port) = match hostport.split_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(6379)),
            None => (hostport.to_string(), 6379),
        };

        Self {
            host,
            port,
            password,
            db,
        }
    }

    pub fn to_redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{host}:{port}/{db}",
                password = password,
                host = self.host,
                port = self.port,
                db = self.db
            ),
            None => format!("redis://{host}:{port}/{db}", host = self.host, port = self.port, db = self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_tunables() {
        let config = QubeConfig::default();
        assert_eq!(config.pool_min, 2);
        assert_eq!(config.pool_max, 1000);
        assert_eq!(config.inactivity_timeout_ms, 2000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.notify_channel, "QUEUE:NEWJOB");
    }

    #[test]
    fn validate_rejects_inverted_pool_bounds() {
        let config = QubeConfig {
            pool_min: 10,
            pool_max: 5,
            ..QubeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_roundtrip_through_redis_url() {
        let creds = StoreCredentials::parse("redis://:secret@store.internal:6380/3");
        assert_eq!(creds.host, "store.internal");
        assert_eq!(creds.port, 6380);
        assert_eq!(creds.password.as_deref(), Some("secret"));
        assert_eq!(creds.db, 3);
        assert_eq!(creds.to_redis_url(), "redis://:secret@store.internal:6380/3");
    }

    #[test]
    fn credentials_default_port_and_db() {
        let creds = StoreCredentials::parse("redis://127.0.0.1");
        assert_eq!(creds.port, 6379);
        assert_eq!(creds.db, 0);
        assert!(creds.password.is_none());
    }
}
