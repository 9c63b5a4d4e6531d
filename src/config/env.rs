//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "CONFORMANCE_ENGINE";

/// Overrides read from `CONFORMANCE_ENGINE_*` variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// CONFORMANCE_ENGINE_ASYNC_JOBS
    pub async_jobs: Option<bool>,
    /// CONFORMANCE_ENGINE_WORKERS
    pub max_workers: Option<usize>,
    /// CONFORMANCE_ENGINE_DATA_DIR
    pub data_dir: Option<String>,
    /// CONFORMANCE_ENGINE_LOG_LEVEL
    pub log_level: Option<String>,
    /// CONFORMANCE_ENGINE_HTTP_TIMEOUT
    pub http_timeout: Option<u64>,
    /// CONFORMANCE_ENGINE_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}"));

        Self {
            async_jobs: get("ASYNC_JOBS").map(|v| parse_bool(&v)),
            max_workers: get("WORKERS").and_then(|v| v.parse().ok()),
            data_dir: get("DATA_DIR").filter(|v| !v.is_empty()),
            log_level: get("LOG_LEVEL"),
            http_timeout: get("HTTP_TIMEOUT").and_then(|v| v.parse().ok()),
            config_file: get("CONFIG"),
        }
    }

    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Overwrite every setting present in the environment
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(async_jobs) = self.async_jobs {
            config.async_jobs = async_jobs;
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = Some(data_dir.clone());
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(http_timeout) = self.http_timeout {
            config.http_timeout_secs = http_timeout;
        }
    }

    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_ASYNC_JOBS:   {:?}", self.async_jobs);
        println!("  {ENV_PREFIX}_WORKERS:      {:?}", self.max_workers);
        println!("  {ENV_PREFIX}_DATA_DIR:     {:?}", self.data_dir);
        println!("  {ENV_PREFIX}_LOG_LEVEL:    {:?}", self.log_level);
        println!("  {ENV_PREFIX}_HTTP_TIMEOUT: {:?}", self.http_timeout);
        println!("  {ENV_PREFIX}_CONFIG:       {:?}", self.config_file);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all CONFORMANCE_ENGINE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_ASYNC_JOBS    Run jobs on background workers (true/false)");
    println!("  {ENV_PREFIX}_WORKERS       Number of background workers");
    println!("  {ENV_PREFIX}_DATA_DIR      Directory for persisted sessions and results");
    println!("  {ENV_PREFIX}_LOG_LEVEL     Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_HTTP_TIMEOUT  HTTP timeout in seconds");
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
}
