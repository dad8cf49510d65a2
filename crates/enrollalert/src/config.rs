/// Runtime configuration: JSON file, then environment, then CLI flags
use crate::types::Term;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub term: Term,
    pub api_base_url: String,
    /// Fixed number of concurrent scrape workers
    pub workers: usize,
    /// Courses handled per scrape/write chunk during a refresh
    pub batch_size: usize,
    /// Number of courses requested by the initial bulk load
    pub initial_count: usize,
    pub request_timeout_secs: u64,
    /// Known-empty courses are skipped until their cache entry is this old
    pub stale_after_hours: i64,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub alert_template: Option<String>,
    pub site_url: String,
    pub listen_addr: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("enrollalert.db"),
            term: Term::default(),
            api_base_url: "https://public.enroll.wisc.edu".to_string(),
            workers: 10,
            batch_size: 100,
            initial_count: 5666,
            request_timeout_secs: 30,
            stale_after_hours: 24,
            mail_relay_url: None,
            mail_from: "alerts@enrollalert.com".to_string(),
            alert_template: None,
            site_url: "https://enrollalert.com".to_string(),
            listen_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Loads the config file (if given) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENROLLALERT_DB") {
            self.database_path = PathBuf::from(v);
        }
        // plain TERM is the terminal type in every shell
        if let Some(v) = lookup("ENROLL_TERM") {
            self.term = parse_value("ENROLL_TERM", &v)?;
        }
        if let Some(v) = lookup("ENROLL_API_BASE") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("WORKERS") {
            self.workers = parse_value("WORKERS", &v)?;
        }
        if let Some(v) = lookup("BATCHSIZE") {
            self.batch_size = parse_value("BATCHSIZE", &v)?;
        }
        if let Some(v) = lookup("COUNT") {
            self.initial_count = parse_value("COUNT", &v)?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MAIL_RELAY_URL") {
            self.mail_relay_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("EMAIL_FROM") {
            self.mail_from = v;
        }
        if let Some(v) = lookup("ALERT_TEMPLATE") {
            self.alert_template = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("LOG_FILE") {
            self.log_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.stale_after_hours < 0 {
            return Err(invalid("stale_after_hours", "must not be negative"));
        }
        url::Url::parse(&self.api_base_url)
            .map_err(|e| invalid("api_base_url", &e.to_string()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_after(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::hours(self.stale_after_hours)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| invalid(key, &e.to_string()))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
