//! Service configuration, read once at startup.

use rv_store::RetryPolicy;
use rv_types::{config_error, RvResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ADDR: &str = "RIVULET_ADDR";
pub const ENV_WORKERS: &str = "RIVULET_WORKERS";
pub const ENV_DEFAULT_MAX_EVALS: &str = "RIVULET_DEFAULT_MAX_EVALS";
pub const ENV_JOB_TIMEOUT_SECS: &str = "RIVULET_JOB_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "RIVULET_DATA_DIR";
pub const ENV_UPSTREAM_URL: &str = "RIVULET_UPSTREAM_URL";
pub const ENV_MODEL_COMMAND: &str = "RIVULET_MODEL_COMMAND";
pub const ENV_STORAGE_RETRIES: &str = "RIVULET_STORAGE_RETRIES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address of the HTTP service.
    pub addr: String,
    /// Worker pool size; caps concurrently running jobs.
    pub workers: usize,
    /// Evaluation budget for calibrations that do not give `MaxEvals`.
    pub default_max_evals: usize,
    pub job_timeout_secs: Option<u64>,
    /// Root of the filesystem artifact store.
    pub data_dir: PathBuf,
    /// Base URL of the geospatial collaborator service.
    pub upstream_url: Option<String>,
    /// Model executable and its leading arguments.
    pub model_command: Option<String>,
    /// Attempts per artifact write, including the first.
    pub storage_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8090".to_string(),
            workers: 4,
            default_max_evals: 50,
            job_timeout_secs: None,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rivulet"),
            upstream_url: None,
            model_command: None,
            storage_retries: 3,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> RvResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| config_error!("{key}={raw:?} is invalid: {e}"))
}

impl ServiceConfig {
    pub fn from_env() -> RvResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> RvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get(ENV_ADDR) {
            config.addr = addr.trim().to_string();
        }
        if let Some(raw) = get(ENV_WORKERS) {
            config.workers = parse(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = get(ENV_DEFAULT_MAX_EVALS) {
            config.default_max_evals = parse(ENV_DEFAULT_MAX_EVALS, &raw)?;
        }
        if let Some(raw) = get(ENV_JOB_TIMEOUT_SECS) {
            config.job_timeout_secs = Some(parse(ENV_JOB_TIMEOUT_SECS, &raw)?);
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir.trim());
        }
        config.upstream_url = get(ENV_UPSTREAM_URL).map(|url| url.trim().trim_end_matches('/').to_string());
        config.model_command = get(ENV_MODEL_COMMAND);
        if let Some(raw) = get(ENV_STORAGE_RETRIES) {
            config.storage_retries = parse(ENV_STORAGE_RETRIES, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RvResult<()> {
        if self.workers == 0 {
            return Err(config_error!("{ENV_WORKERS} must be at least 1"));
        }
        if self.default_max_evals == 0 {
            return Err(config_error!("{ENV_DEFAULT_MAX_EVALS} must be at least 1"));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(config_error!("{ENV_JOB_TIMEOUT_SECS} must be positive"));
        }
        if self.storage_retries == 0 {
            return Err(config_error!("{ENV_STORAGE_RETRIES} must be at least 1"));
        }
        if let Some(url) = &self.upstream_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(config_error!("{ENV_UPSTREAM_URL} must be an http(s) URL, got {url}"));
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.storage_retries,
            ..RetryPolicy::default()
        }
    }
}
