// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Verbosity of the exporter's own diagnostics, read from `DD_LOG_LEVEL`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level {0:?}, expected one of error, warn, info, debug, trace")]
pub struct UnknownLogLevel(pub String);

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        LevelFilter::from(self)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => return Err(UnknownLogLevel(s.to_string())),
        };
        Ok(level)
    }
}

/// Anything unreadable falls back to [`LogLevel::Warn`] so a bad level never
/// fails the whole configuration.
pub fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: Deserializer<'de>,
{
    let level = match Value::deserialize(deserializer)? {
        Value::String(s) => s.parse().unwrap_or_else(|e: UnknownLogLevel| {
            error!("{e}, using {}", LogLevel::Warn);
            LogLevel::Warn
        }),
        other => {
            error!("Expected a string for log level, got {other:?}");
            LogLevel::Warn
        }
    };
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "deserialize_log_level")]
        level: LogLevel,
    }

    fn parse(json: &str) -> LogLevel {
        serde_json::from_str::<Wrapper>(json)
            .expect("parse")
            .level
    }

    #[test]
    fn test_from_str() {
        assert_eq!("DEBUG".parse(), Ok(LogLevel::Debug));
        assert_eq!(" warning ".parse(), Ok(LogLevel::Warn));
        assert_eq!(
            "loud".parse::<LogLevel>(),
            Err(UnknownLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_deserialize_falls_back_to_warn() {
        assert_eq!(parse(r#"{"level":"verbose"}"#), LogLevel::Warn);
        assert_eq!(parse(r#"{"level":3}"#), LogLevel::Warn);
        assert_eq!(parse(r#"{"level":"trace"}"#), LogLevel::Trace);
    }

    #[test]
    fn test_level_filter_follows_verbosity() {
        assert_eq!(LogLevel::Info.as_level_filter(), LevelFilter::INFO);
        assert_eq!(LogLevel::default().as_level_filter(), LevelFilter::WARN);
        assert!(LogLevel::Error < LogLevel::Trace);
        assert!(LogLevel::Error.as_level_filter() < LogLevel::Trace.as_level_filter());
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }
}
