// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::traces::error::ExportError;
use crate::traces::sampler::{AgentRates, SamplingRateStore};
use crate::traces::transport::Transport;

/// Ships serialized payloads and feeds the agent's sampling rates back into
/// the store. Failed payloads are not retried.
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    rates: Arc<SamplingRateStore>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("rates", &self.rates)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, rates: Arc<SamplingRateStore>) -> Self {
        Uploader { transport, rates }
    }

    pub async fn upload(&self, payload: Bytes, trace_count: usize) -> Result<(), ExportError> {
        debug!(
            "TRACES | Uploading {trace_count} traces, {} bytes",
            payload.len()
        );
        let body = self.transport.send(payload, trace_count).await?;
        let rates: AgentRates = serde_json::from_slice(&body)?;
        self.rates.replace_all(rates.rate_by_service);
        Ok(())
    }
}
