//! Configuration module
//!
//! Settings come from a configuration file (see [`ConfigFile`]) with
//! environment overrides (see [`EnvConfig`]) applied on top.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{ConfigFile, ConfigFormat};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::logger::LogLevel;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Hand runs to background workers instead of executing inline
    pub async_jobs: bool,

    /// Concurrent background workers
    pub max_workers: usize,

    /// Root of the file repository; in-memory storage when unset
    pub data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HTTP timeout in seconds
    pub http_timeout_secs: u64,

    /// How long a waiting test stays parked when it sets no deadline
    pub default_wait_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            async_jobs: false,
            max_workers: 4,
            data_dir: None,
            log_level: "info".to_string(),
            http_timeout_secs: 30,
            default_wait_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// File config (explicit path or discovered) with environment overrides.
    ///
    /// Returns the path the file settings came from, if any.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env = EnvConfig::load();
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => env.config_file.as_ref().map(PathBuf::from).or_else(ConfigFile::find),
        };

        let mut config = match &path {
            Some(path) => ConfigFile::load(path)?.app,
            None => Self::default(),
        };
        env.apply_to(&mut config);
        config.validate()?;
        Ok((config, path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than 0");
        }
        if LogLevel::from_str(&self.log_level).is_none() {
            bail!("Unknown log level: {}", self.log_level);
        }
        Ok(())
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_str(&self.log_level).unwrap_or(LogLevel::Info)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.default_wait_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(!config.async_jobs);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.data_dir, None);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_wait_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AppConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("async_jobs: true\n").unwrap();
        assert!(config.async_jobs);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.log_level(), LogLevel::Info);
    }
}
