// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling rates reported by the agent and the priority sampling applied to
//! root spans.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error};

use crate::traces::constants::{
    ENV_KEY, PRIORITY_AUTO_KEEP, PRIORITY_AUTO_REJECT, SAMPLING_PRIORITY_METRIC_KEY,
    SAMPLING_PRIORITY_RATE_METRIC_KEY,
};
use crate::traces::span::DdSpan;

/// Key under which the agent reports the fallback rate.
pub const DEFAULT_RATE_KEY: &str = "service:,env:";

/// Rate used until the agent reports one.
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Knuth's multiplicative hashing factor, shared with the other Datadog tracers.
const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// Body of a successful trace intake response.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct AgentRates {
    #[serde(default)]
    pub rate_by_service: HashMap<String, f64>,
}

#[must_use]
pub fn service_env_key(service: &str, env: &str) -> String {
    format!("service:{service},env:{env}")
}

/// Sampling rate table keyed by `service:<name>,env:<env>`.
///
/// Written only after a successful upload, read by anyone deciding on the
/// sampling of new traces.
#[derive(Debug, Default)]
pub struct SamplingRateStore {
    rates: RwLock<HashMap<String, f64>>,
}

impl SamplingRateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate for the given key, falling back to the default key and then to
    /// [`DEFAULT_SAMPLE_RATE`].
    #[must_use]
    pub fn get(&self, key: &str) -> f64 {
        match self.rates.read() {
            Ok(rates) => rates
                .get(key)
                .or_else(|| rates.get(DEFAULT_RATE_KEY))
                .copied()
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            Err(e) => {
                error!("TRACES | Sampling rates lock poisoned: {e}");
                DEFAULT_SAMPLE_RATE
            }
        }
    }

    /// Replaces the whole table at once.
    pub fn replace_all(&self, rates: HashMap<String, f64>) {
        debug!("TRACES | Updating sampling rates for {} keys", rates.len());
        match self.rates.write() {
            Ok(mut guard) => *guard = rates,
            Err(e) => {
                error!("TRACES | Sampling rates lock poisoned: {e}");
                let mut guard = e.into_inner();
                *guard = rates;
                self.rates.clear_poison();
            }
        }
    }

    /// Rate matching the span's service and `env` tag.
    #[must_use]
    pub fn rate_for(&self, span: &DdSpan) -> f64 {
        let env = span.meta.get(ENV_KEY).map_or("", String::as_str);
        self.get(&service_env_key(&span.service, env))
    }

    /// Sets the sampling priority on root spans that don't carry one yet.
    pub fn apply_priority(&self, span: &mut DdSpan) {
        if !span.is_root() || span.metrics.contains_key(SAMPLING_PRIORITY_METRIC_KEY) {
            return;
        }
        let rate = self.rate_for(span);
        let priority = if sampled_by_rate(span.trace_id, rate) {
            PRIORITY_AUTO_KEEP
        } else {
            PRIORITY_AUTO_REJECT
        };
        span.metrics
            .insert(SAMPLING_PRIORITY_METRIC_KEY.to_string(), priority);
        span.metrics
            .insert(SAMPLING_PRIORITY_RATE_METRIC_KEY.to_string(), rate);
    }
}

/// Deterministic keep decision for a trace at the given rate.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sampled_by_rate(trace_id: u64, rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    trace_id.wrapping_mul(KNUTH_FACTOR) < (rate * u64::MAX as f64) as u64
}
