//! Tracing subscriber initialization.
//!
//! `RUST_LOG` selects the filter (default `info`); `CLINICFLOW_LOG_FORMAT` selects
//! `json` (default), `pretty` or `compact` output.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_VAR: &str = "CLINICFLOW_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format `{0}` (expected json, pretty or compact)")]
pub struct LogFormatError(pub String);

impl FromStr for LogFormat {
    type Err = LogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(LogFormatError(other.to_string())),
        }
    }
}

impl LogFormat {
    /// Format named by `CLINICFLOW_LOG_FORMAT`; unset or unrecognised values fall
    /// back to JSON.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Initialize tracing/logging for the process using the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::from_env());
}

/// Initialize with an explicit output format. Returns `false` when a global
/// subscriber was already installed.
pub fn init_with(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let installed = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert_eq!(err, LogFormatError("xml".to_string()));
    }

    #[test]
    fn second_init_is_a_no_op() {
        init_with(LogFormat::Compact);
        assert!(!init_with(LogFormat::Json));
    }
}
