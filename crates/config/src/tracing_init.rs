use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

/// How log lines are rendered. `json` suits collectors that key alerts off
/// the `alert` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// `RUST_LOG` wins over `LOG_LEVEL`; `default_level` applies when neither
/// parses.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let subscriber = fmt().with_env_filter(env_filter(default_level)).with_target(true);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
