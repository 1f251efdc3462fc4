use std::env;
use std::str::FromStr;
use unisync_common::error::{UnisyncError, UnisyncResult};

use crate::tracing_init::LogFormat;

/// Which stream errors a run keeps for its terminal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorRetention {
    /// A single error survives: the last user error, else the most recent.
    #[default]
    Last,
    /// Every error is kept in the detail.
    All,
}

impl FromStr for ErrorRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" => Ok(ErrorRetention::Last),
            "all" => Ok(ErrorRetention::All),
            other => Err(format!("expected 'last' or 'all', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub unified_api_url: String,
    pub unified_api_key: String,
    pub mgmt_api_url: String,
    pub application_id: String,
    pub sync_interval_secs: u64,
    pub max_concurrent_syncs: usize,
    pub stream_concurrency: usize,
    pub error_retention: ErrorRetention,
    pub http_max_retries: u32,
    pub http_timeout_secs: u64,
    pub run_once: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> UnisyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let unified_api_url = get_var("UNIFIED_API_URL")?;
        let mgmt_api_url = get_var_or("MGMT_API_URL", &unified_api_url);

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            unified_api_key: get_var("UNIFIED_API_KEY")?,
            application_id: get_var("APPLICATION_ID")?,
            unified_api_url,
            mgmt_api_url,
            sync_interval_secs: parse_var("SYNC_INTERVAL_SECS", "3600")?,
            max_concurrent_syncs: parse_var("MAX_CONCURRENT_SYNCS", "4")?,
            stream_concurrency: parse_var("STREAM_CONCURRENCY", "1")?,
            error_retention: parse_var("ERROR_RETENTION", "last")?,
            http_max_retries: parse_var("HTTP_MAX_RETRIES", "3")?,
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", "30")?,
            run_once: parse_var("RUN_ONCE", "false")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            log_format: parse_var("LOG_FORMAT", "text")?,
        })
    }
}

fn get_var(key: &str) -> UnisyncResult<String> {
    env::var(key).map_err(|_| UnisyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: &str) -> UnisyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_var_or(key, default)
        .parse()
        .map_err(|e| UnisyncError::Config(format!("invalid {key}: {e}")))
}
