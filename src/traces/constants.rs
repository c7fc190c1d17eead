// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

// Reserved attribute keys understood by the converter.
pub const ERROR_KEY: &str = "error";
pub const ERROR_MSG_KEY: &str = "error.msg";
pub const ERROR_TYPE_KEY: &str = "error.type";
pub const SERVICE_NAME_KEY: &str = "service.name";
pub const RESOURCE_NAME_KEY: &str = "resource.name";
pub const SPAN_TYPE_KEY: &str = "span.type";
pub const SPAN_NAME_KEY: &str = "span.name";
pub const ANALYTICS_EVENT_KEY: &str = "analytics.event";
pub const SAMPLING_PRIORITY_KEY: &str = "sampling.priority";
pub const ENV_KEY: &str = "env";
pub const VERSION_KEY: &str = "version";

// Keys written by the converter.
pub const EVENT_SAMPLE_RATE_KEY: &str = "_dd1.sr.eausr";
pub const SAMPLING_PRIORITY_METRIC_KEY: &str = "_sampling_priority_v1";
pub const SAMPLING_PRIORITY_RATE_METRIC_KEY: &str = "_sampling_priority_rate_v1";
pub const STATUS_CODE_KEY: &str = "opencensus.status_code";
pub const STATUS_KEY: &str = "opencensus.status";
pub const STATUS_DESCRIPTION_KEY: &str = "opencensus.status_description";

pub const DEFAULT_OPERATION_NAME: &str = "opencensus";
pub const SPAN_TYPE_CLIENT: &str = "client";
pub const SPAN_TYPE_SERVER: &str = "server";

/// Sampling priorities set on root spans.
pub const PRIORITY_AUTO_REJECT: f64 = 0.0;
pub const PRIORITY_AUTO_KEEP: f64 = 1.0;
