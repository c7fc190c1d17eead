// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use rmp::encode::write_array_len;
use std::collections::BTreeMap;

use crate::traces::error::ExportError;
use crate::traces::span::DdSpan;

/// Maximum content size per payload in bytes that the Datadog agent accepts.
pub const PAYLOAD_LIMIT_BYTES: usize = 10_000_000;

/// Worst case width of a msgpack array header.
const ARRAY_LEN_HEADER_WIDTH: usize = 5;

#[derive(Debug, Default)]
struct TraceChunk {
    span_count: u32,
    encoded: Vec<u8>,
}

/// Spans accumulated since the last flush, grouped by trace and already
/// msgpack encoded so the size estimate is exact.
#[derive(Debug, Default)]
pub struct Payload {
    traces: BTreeMap<u64, TraceChunk>,
    size: usize,
    scratch: Vec<u8>,
}

impl Payload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes the span and appends it to its trace. Spans that fail to
    /// encode are not added.
    pub fn add(&mut self, span: &DdSpan) -> Result<(), ExportError> {
        self.scratch.clear();
        rmp_serde::encode::write_named(&mut self.scratch, span)?;

        let chunk = self.traces.entry(span.trace_id).or_default();
        if chunk.span_count == 0 {
            self.size += ARRAY_LEN_HEADER_WIDTH;
        }
        chunk.span_count += 1;
        chunk.encoded.extend_from_slice(&self.scratch);
        self.size += self.scratch.len();
        Ok(())
    }

    /// Estimated size of the serialized payload in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Serializes the payload as an array of traces, each an array of spans.
    /// Traces are written in trace id order.
    pub fn serialize(&self) -> Result<Bytes, ExportError> {
        let mut buf = Vec::with_capacity(self.size + ARRAY_LEN_HEADER_WIDTH);
        let trace_count = u32::try_from(self.traces.len())
            .map_err(|e| ExportError::PayloadWrite(e.to_string()))?;
        write_array_len(&mut buf, trace_count)?;
        for chunk in self.traces.values() {
            write_array_len(&mut buf, chunk.span_count)?;
            buf.extend_from_slice(&chunk.encoded);
        }
        Ok(Bytes::from(buf))
    }

    pub fn reset(&mut self) {
        self.traces.clear();
        self.size = 0;
    }
}
