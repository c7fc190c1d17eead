// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

/// Parses `key:value` pairs separated by commas. Only the first colon splits,
/// so values may contain colons.
#[must_use]
pub fn parse_tags(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                error!("Failed to parse tag '{pair}', expected format 'key:value', ignoring");
                None
            }
        })
        .collect()
}

/// Accepts either a `k:v,k2:v2` string (environment) or a list of `k:v`
/// strings (yaml).
pub fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(parse_tags(&s)),
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(parse_tags)
            .collect()),
        Value::Null => Ok(BTreeMap::new()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a list of strings",
        )),
    }
}
