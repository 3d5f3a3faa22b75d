//! Configuration loader with file and environment variable support.

use crate::{ConfigError, QubeConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths, checked in order.
const CONFIG_PATHS: &[&str] = &[
    "qube.toml",
    "./config/qube.toml",
    "/etc/qube/qube.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides.
    pub fn load(&self) -> Result<QubeConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "loading qube configuration from file");
                QubeConfig::from_file(&path)?
            }
            None => QubeConfig::default(),
        };

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("QUBE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut QubeConfig) {
        if let Ok(val) = env::var("QUBE_REDIS_URL") {
            config.redis_url = val;
        }
        if let Ok(val) = env::var("QUBE_POOL_MIN") {
            if let Ok(n) = val.parse() {
                config.pool_min = n;
            }
        }
        if let Ok(val) = env::var("QUBE_POOL_MAX") {
            if let Ok(n) = val.parse() {
                config.pool_max = n;
            }
        }
        if let Ok(val) = env::var("QUBE_INACTIVITY_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.inactivity_timeout_ms = n;
            }
        }
        if let Ok(val) = env::var("QUBE_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.poll_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("QUBE_NOTIFY_CHANNEL") {
            config.notify_channel = val;
        }
        if let Ok(val) = env::var("QUBE_KEY_PREFIX") {
            config.key_prefix = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_falls_back_to_defaults_when_no_file_found() {
        let loader = ConfigLoader::with_path("/nonexistent/qube.toml");
        let config = loader.load().expect("defaults are valid");
        assert_eq!(config.redis_url, QubeConfig::default().redis_url);
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qube.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "pool_max = 50").unwrap();

        let loader = ConfigLoader::with_path(&path);
        let config = loader.load().unwrap();
        assert_eq!(config.pool_max, 50);
        assert_eq!(config.pool_min, 2); // untouched fields keep defaults
    }
}
