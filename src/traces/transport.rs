// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

use crate::traces::error::ExportError;

pub const TRACES_ENDPOINT_PATH: &str = "/v0.4/traces";

pub const TRACE_COUNT_HEADER: &str = "X-Datadog-Trace-Count";
pub const LANG_HEADER: &str = "Datadog-Meta-Lang";
pub const TRACER_VERSION_HEADER: &str = "Datadog-Meta-Tracer-Version";
const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// Delivers one serialized payload to the agent and returns the response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Bytes, trace_count: usize) -> Result<Bytes, ExportError>;
}

/// Sends payloads to the agent's v0.4 trace endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(agent_url: &str, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, agent_url, timeout))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, agent_url: &str, timeout: Duration) -> Self {
        HttpTransport {
            client,
            endpoint: format!("{}{TRACES_ENDPOINT_PATH}", agent_url.trim_end_matches('/')),
            timeout,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Bytes, trace_count: usize) -> Result<Bytes, ExportError> {
        let time = std::time::Instant::now();
        let response = self
            .client
            .put(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, MSGPACK_CONTENT_TYPE)
            .header(TRACE_COUNT_HEADER, trace_count.to_string())
            .header(LANG_HEADER, "rust")
            .header(TRACER_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
            .timeout(self.timeout)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if status.is_client_error() || status.is_server_error() {
            return Err(ExportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        debug!(
            "TRACES | Sent {trace_count} traces to {} in {} ms",
            self.endpoint,
            time.elapsed().as_millis()
        );
        Ok(body)
    }
}
