use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, SidecarError};

/// Sidecar configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
    pub host: String,
    pub port: u16,
    /// Per-series buffer cap.
    pub max_points: usize,
    /// Colon-separated list of model directories.
    pub model_paths: String,
    pub score_interval: Duration,
    pub inference_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_points: 1000,
            model_paths: String::new(),
            score_interval: Duration::from_secs(60),
            inference_timeout: Duration::from_millis(5000),
        }
    }
}

impl SidecarConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `8080`    |
    /// | `MAX_POINTS`           | `1000`    |
    /// | `MODEL_PATHS`          | empty     |
    /// | `SCORE_INTERVAL_SECS`  | `60`      |
    /// | `INFERENCE_TIMEOUT_MS` | `5000`    |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            max_points: parse(&lookup, "MAX_POINTS", defaults.max_points)?,
            model_paths: lookup("MODEL_PATHS").unwrap_or(defaults.model_paths),
            score_interval: Duration::from_secs(parse(
                &lookup,
                "SCORE_INTERVAL_SECS",
                defaults.score_interval.as_secs(),
            )?),
            inference_timeout: Duration::from_millis(parse(
                &lookup,
                "INFERENCE_TIMEOUT_MS",
                defaults.inference_timeout.as_millis() as u64,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 {
            return Err(SidecarError::Config("MAX_POINTS must be positive".into()));
        }
        if self.score_interval.is_zero() {
            return Err(SidecarError::Config("SCORE_INTERVAL_SECS must be positive".into()));
        }
        if self.inference_timeout.is_zero() {
            return Err(SidecarError::Config("INFERENCE_TIMEOUT_MS must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SidecarError::Config(format!("{} must be a valid number: {}", key, e))),
        None => Ok(default),
    }
}
