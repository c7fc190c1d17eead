// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline loop and the handle applications use to feed it.
//!
//! A single task owns the intake queue, the payload under construction and
//! the flush timer. Producers only ever `try_send` into the bounded queue, so
//! they never block. Uploads run as separate tasks tracked in a `JoinSet` and
//! are only awaited when the exporter is stopped.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::config::Config;
use crate::traces::error::{AmortizedError, ErrorKind, ExportError};
use crate::traces::error_amortizer::{ErrorAmortizer, ErrorCallback};
use crate::traces::payload::Payload;
use crate::traces::sampler::SamplingRateStore;
use crate::traces::span::{AttributeValue, SpanData};
use crate::traces::span_converter::{ConverterConfig, convert};
use crate::traces::transport::{HttpTransport, Transport};
use crate::traces::uploader::Uploader;

pub enum ExporterCommand {
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable, non-blocking entry point for spans.
///
/// Spans sent after the exporter stopped are dropped silently.
#[derive(Clone, Debug)]
pub struct SpanSender {
    tx: mpsc::Sender<SpanData>,
    errors: Arc<ErrorAmortizer>,
}

impl SpanSender {
    pub fn export_span(&self, span: SpanData) {
        match self.tx.try_send(span) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.errors
                    .log(ErrorKind::Overflow, Some(ExportError::Overflow));
            }
        }
    }
}

/// Handle to a running exporter.
#[derive(Debug)]
pub struct TraceExporter {
    spans: SpanSender,
    commands_tx: mpsc::UnboundedSender<ExporterCommand>,
    rates: Arc<SamplingRateStore>,
    task: JoinHandle<()>,
}

impl TraceExporter {
    #[must_use]
    pub fn builder(config: Arc<Config>) -> TraceExporterBuilder {
        TraceExporterBuilder::new(config)
    }

    /// Starts an exporter with the default HTTP transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(config: Arc<Config>) -> Result<Self, ExportError> {
        Self::builder(config).start()
    }

    /// Queues a span for export without blocking. A full queue drops the span
    /// and counts an overflow error.
    pub fn export_span(&self, span: SpanData) {
        self.spans.export_span(span);
    }

    #[must_use]
    pub fn span_sender(&self) -> SpanSender {
        self.spans.clone()
    }

    /// Flushes the current payload. Returns once the payload was handed to an
    /// upload task, not once the upload completed.
    pub async fn force_flush(&self) -> Result<(), ExportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands_tx
            .send(ExporterCommand::Flush(ack_tx))
            .map_err(|_| ExportError::Shutdown)?;
        ack_rx.await.map_err(|_| ExportError::Shutdown)
    }

    /// Drains every queued span, flushes, and waits for all uploads.
    pub async fn stop(self) -> Result<(), ExportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands_tx
            .send(ExporterCommand::Shutdown(ack_tx))
            .map_err(|_| ExportError::Shutdown)?;
        let acked = ack_rx.await;
        if let Err(e) = self.task.await {
            error!("TRACES | Exporter task failed: {e}");
        }
        acked.map_err(|_| ExportError::Shutdown)
    }

    #[must_use]
    pub fn sampling_rates(&self) -> Arc<SamplingRateStore> {
        self.rates.clone()
    }

    #[must_use]
    pub fn errors(&self) -> Arc<ErrorAmortizer> {
        self.spans.errors.clone()
    }
}

pub struct TraceExporterBuilder {
    config: Arc<Config>,
    on_error: Option<ErrorCallback>,
    transport: Option<Arc<dyn Transport>>,
    global_tags: BTreeMap<String, AttributeValue>,
}

impl TraceExporterBuilder {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        TraceExporterBuilder {
            config,
            on_error: None,
            transport: None,
            global_tags: BTreeMap::new(),
        }
    }

    /// Receives amortized export errors instead of the log.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AmortizedError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Tag added to every span, on top of the configured ones. Span
    /// attributes still take precedence.
    #[must_use]
    pub fn global_tag(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.global_tags.insert(key.into(), value.into());
        self
    }

    /// Spawns the pipeline loop on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(self) -> Result<TraceExporter, ExportError> {
        let config = self.config;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &config.trace_agent_url,
                config.upload_timeout(),
            )?),
        };
        let mut converter = config.converter_config();
        converter.global_tags.extend(self.global_tags);

        let rates = Arc::new(SamplingRateStore::new());
        let errors = Arc::new(ErrorAmortizer::new(self.on_error));
        let (spans_tx, spans_rx) = mpsc::channel(config.trace_intake_queue_capacity.max(1));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let service = ExporterService {
            spans_rx,
            commands_rx,
            converter,
            payload: Payload::new(),
            flush_threshold: config.trace_flush_threshold_bytes,
            uploader: Uploader::new(transport, rates.clone()),
            upload_permits: Arc::new(Semaphore::new(config.trace_max_concurrent_uploads.max(1))),
            uploads: JoinSet::new(),
            rates: rates.clone(),
            errors: errors.clone(),
        };
        let flush_tick = ticker(config.flush_interval());
        let report_tick = ticker(config.error_report_interval());
        let task = tokio::spawn(service.run(flush_tick, report_tick));

        Ok(TraceExporter {
            spans: SpanSender {
                tx: spans_tx,
                errors,
            },
            commands_tx,
            rates,
            task,
        })
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    // the first tick fires one period from now, not immediately
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

struct ExporterService {
    spans_rx: mpsc::Receiver<SpanData>,
    commands_rx: mpsc::UnboundedReceiver<ExporterCommand>,
    converter: ConverterConfig,
    payload: Payload,
    flush_threshold: usize,
    uploader: Uploader,
    upload_permits: Arc<Semaphore>,
    uploads: JoinSet<()>,
    rates: Arc<SamplingRateStore>,
    errors: Arc<ErrorAmortizer>,
}

impl ExporterService {
    async fn run(mut self, mut flush_tick: Interval, mut report_tick: Interval) {
        debug!("TRACES | Exporter started");

        loop {
            tokio::select! {
                Some(span) = self.spans_rx.recv() => self.accept(span),
                _ = flush_tick.tick() => self.flush(),
                _ = report_tick.tick() => {
                    self.errors.flush();
                }
                Some(result) = self.uploads.join_next(), if !self.uploads.is_empty() => {
                    Self::reap(result);
                }
                command = self.commands_rx.recv() => match command {
                    Some(ExporterCommand::Flush(ack)) => {
                        // spans queued before the request belong in this flush
                        while let Ok(span) = self.spans_rx.try_recv() {
                            self.accept(span);
                        }
                        self.flush();
                        if ack.send(()).is_err() {
                            debug!("TRACES | Flush requester went away before the ack");
                        }
                    }
                    Some(ExporterCommand::Shutdown(ack)) => {
                        self.drain().await;
                        if ack.send(()).is_err() {
                            debug!("TRACES | Stop requester went away before the ack");
                        }
                        break;
                    }
                    None => {
                        debug!("TRACES | Exporter handle dropped, draining");
                        self.drain().await;
                        break;
                    }
                },
            }
        }

        debug!("TRACES | Exporter stopped");
    }

    fn accept(&mut self, span: SpanData) {
        self.add(span);
        if self.over_threshold() {
            self.flush();
        }
    }

    fn add(&mut self, span: SpanData) {
        let mut span = convert(span, &self.converter);
        self.rates.apply_priority(&mut span);
        if let Err(e) = self.payload.add(&span) {
            debug!("TRACES | Dropping span {}: {e}", span.span_id);
            self.errors.log(e.kind(), Some(e));
        }
    }

    fn over_threshold(&self) -> bool {
        self.payload.size() > self.flush_threshold
    }

    /// Serializes and resets the payload. `None` when there is nothing to send.
    fn take_payload(&mut self) -> Option<(Bytes, usize)> {
        if self.payload.is_empty() {
            return None;
        }
        let trace_count = self.payload.trace_count();
        let serialized = self.payload.serialize();
        self.payload.reset();

        match serialized {
            Ok(body) => Some((body, trace_count)),
            Err(e) => {
                debug!("TRACES | Failed to serialize {trace_count} traces: {e}");
                self.errors.log(e.kind(), Some(e));
                None
            }
        }
    }

    /// Hands the payload to an upload task, dropping it when every upload
    /// slot is busy.
    fn flush(&mut self) {
        let Some((body, trace_count)) = self.take_payload() else {
            return;
        };
        let Ok(permit) = self.upload_permits.clone().try_acquire_owned() else {
            let e = ExportError::TooManyUploads {
                traces: trace_count,
            };
            debug!("TRACES | {e}");
            self.errors.log(e.kind(), Some(e));
            return;
        };
        self.spawn_upload(permit, body, trace_count);
    }

    /// Like `flush`, but waits for an upload slot instead of dropping.
    async fn flush_waiting(&mut self) {
        let Some((body, trace_count)) = self.take_payload() else {
            return;
        };
        match self.upload_permits.clone().acquire_owned().await {
            Ok(permit) => self.spawn_upload(permit, body, trace_count),
            Err(e) => {
                error!("TRACES | Upload slots closed, dropping {trace_count} traces: {e}");
            }
        }
    }

    fn spawn_upload(&mut self, permit: OwnedSemaphorePermit, body: Bytes, trace_count: usize) {
        debug!("TRACES | Flushing {trace_count} traces");
        let uploader = self.uploader.clone();
        let errors = self.errors.clone();
        self.uploads.spawn(async move {
            let _permit = permit;
            if let Err(e) = uploader.upload(body, trace_count).await {
                debug!("TRACES | Failed to upload {trace_count} traces: {e}");
                errors.log(e.kind(), Some(e));
            }
        });
    }

    fn reap(result: Result<(), JoinError>) {
        if let Err(e) = result {
            error!("TRACES | Upload task failed: {e}");
        }
    }

    async fn drain(&mut self) {
        self.spans_rx.close();
        while let Some(span) = self.spans_rx.recv().await {
            self.add(span);
            if self.over_threshold() {
                self.flush_waiting().await;
            }
        }
        self.flush_waiting().await;
        while let Some(result) = self.uploads.join_next().await {
            Self::reap(result);
        }
        self.errors.flush();
    }
}
