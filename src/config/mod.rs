// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod log_level;
pub mod tags;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Format, Yaml};
use figment::{Figment, providers::Env};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::{
    log_level::{LogLevel, deserialize_log_level},
    tags::deserialize_tags,
};
use crate::traces::constants::{ENV_KEY, VERSION_KEY};
use crate::traces::payload::PAYLOAD_LIMIT_BYTES;
use crate::traces::span::AttributeValue;
use crate::traces::span_converter::ConverterConfig;

/// Service name used when none is configured.
pub const DEFAULT_SERVICE: &str = "opencensus-app";
pub const DEFAULT_AGENT_URL: &str = "http://localhost:8126";

#[derive(Debug, PartialEq, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub service: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub env: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub version: Option<String>,
    #[serde(deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub trace_agent_url: String,
    pub trace_flush_interval_ms: u64,
    // flushing starts once the encoded payload grows past this many bytes
    pub trace_flush_threshold_bytes: usize,
    pub trace_intake_queue_capacity: usize,
    pub trace_max_concurrent_uploads: usize,
    pub trace_upload_timeout_ms: u64,
    pub error_report_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            // Unified Tagging
            service: None,
            env: None,
            version: None,
            tags: BTreeMap::new(),
            log_level: LogLevel::default(),
            // Traces
            trace_agent_url: DEFAULT_AGENT_URL.to_string(),
            trace_flush_interval_ms: 2_000,
            // leave headroom under the agent's limit for the span that crosses it
            trace_flush_threshold_bytes: PAYLOAD_LIMIT_BYTES / 2,
            trace_intake_queue_capacity: 200_000,
            trace_max_concurrent_uploads: 16,
            trace_upload_timeout_ms: 2_000,
            error_report_interval_ms: 5_000,
        }
    }
}

impl Config {
    /// Configured service, or [`DEFAULT_SERVICE`].
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or(DEFAULT_SERVICE)
    }

    /// Tags added to every span: `DD_TAGS`, then `env` and `version`.
    #[must_use]
    pub fn global_tags(&self) -> BTreeMap<String, AttributeValue> {
        let mut tags: BTreeMap<String, AttributeValue> = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from(v.as_str())))
            .collect();
        if let Some(env) = &self.env {
            tags.insert(ENV_KEY.to_string(), env.as_str().into());
        }
        if let Some(version) = &self.version {
            tags.insert(VERSION_KEY.to_string(), version.as_str().into());
        }
        tags
    }

    #[must_use]
    pub fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            service: self.service_name().to_string(),
            global_tags: self.global_tags(),
        }
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.trace_flush_interval_ms.max(1))
    }

    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_upload_timeout_ms.max(1))
    }

    #[must_use]
    pub fn error_report_interval(&self) -> Duration {
        Duration::from_millis(self.error_report_interval_ms.max(1))
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
}

/// Loads the configuration from `datadog.yaml` in `config_directory`, if
/// present, overridden by `DD_` prefixed environment variables.
#[allow(clippy::module_name_repetitions)]
pub fn get_config(config_directory: &Path) -> Result<Config, ConfigError> {
    let path = config_directory.join("datadog.yaml");
    let figment = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("DD_"));

    let mut config: Config = figment.extract().map_err(|err| {
        tracing::error!("Failed to parse Datadog config: {err}");
        ConfigError::ParseError(err.to_string())
    })?;

    if config.trace_agent_url.trim().is_empty() {
        config.trace_agent_url = DEFAULT_AGENT_URL.to_string();
    }
    Ok(config)
}

fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => Err(serde::de::Error::custom("expected a string or an integer")),
    }
}
