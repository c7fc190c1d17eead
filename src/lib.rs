// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exports finished application spans to a Datadog agent.
//!
//! Spans are converted to the Datadog layout, batched per trace into msgpack
//! payloads and uploaded to the agent's `/v0.4/traces` endpoint. Sampling
//! rates returned by the agent drive the priority of subsequent traces.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]

pub mod config;
pub mod logger;
pub mod traces;

pub use traces::{SpanSender, TraceExporter, TraceExporterBuilder};
