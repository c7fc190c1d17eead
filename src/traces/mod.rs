// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod constants;
pub mod error;
pub mod error_amortizer;
pub mod exporter;
pub mod payload;
pub mod sampler;
pub mod span;
pub mod span_converter;
pub mod transport;
pub mod uploader;

pub use exporter::{SpanSender, TraceExporter, TraceExporterBuilder};
