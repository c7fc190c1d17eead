// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps finished application spans onto the Datadog span layout.

use std::collections::BTreeMap;
use std::time::{Duration, UNIX_EPOCH};

use crate::traces::constants::{
    ANALYTICS_EVENT_KEY, DEFAULT_OPERATION_NAME, ERROR_KEY, ERROR_MSG_KEY, ERROR_TYPE_KEY,
    EVENT_SAMPLE_RATE_KEY, RESOURCE_NAME_KEY, SAMPLING_PRIORITY_KEY,
    SAMPLING_PRIORITY_METRIC_KEY, SERVICE_NAME_KEY, SPAN_NAME_KEY, SPAN_TYPE_CLIENT,
    SPAN_TYPE_KEY, SPAN_TYPE_SERVER, STATUS_CODE_KEY, STATUS_DESCRIPTION_KEY, STATUS_KEY,
};
use crate::traces::span::{AttributeValue, DdSpan, SpanData, SpanKind, status_codes};

/// Process wide settings read during conversion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConverterConfig {
    pub service: String,
    pub global_tags: BTreeMap<String, AttributeValue>,
}

fn lookup_status(code: i32) -> Option<(&'static str, u16)> {
    let entry = match code {
        status_codes::OK => ("ok", 200),
        status_codes::CANCELLED => ("cancelled", 499),
        status_codes::UNKNOWN => ("unknown", 500),
        status_codes::INVALID_ARGUMENT => ("invalid_argument", 400),
        status_codes::DEADLINE_EXCEEDED => ("deadline_exceeded", 504),
        status_codes::NOT_FOUND => ("not_found", 404),
        status_codes::ALREADY_EXISTS => ("already_exists", 409),
        status_codes::PERMISSION_DENIED => ("permission_denied", 403),
        status_codes::RESOURCE_EXHAUSTED => ("resource_exhausted", 429),
        status_codes::FAILED_PRECONDITION => ("failed_precondition", 400),
        status_codes::ABORTED => ("aborted", 409),
        status_codes::OUT_OF_RANGE => ("out_of_range", 400),
        status_codes::UNIMPLEMENTED => ("unimplemented", 501),
        status_codes::INTERNAL => ("internal", 500),
        status_codes::UNAVAILABLE => ("unavailable", 503),
        status_codes::DATA_LOSS => ("data_loss", 501),
        status_codes::UNAUTHENTICATED => ("unauthenticated", 401),
        _ => return None,
    };
    Some(entry)
}

/// Human readable name of a status code.
#[must_use]
pub fn status_message(code: i32) -> String {
    lookup_status(code).map_or_else(|| format!("error code {code}"), |(msg, _)| msg.to_string())
}

/// HTTP status equivalent of a status code. Unknown codes map to 500.
#[must_use]
pub fn http_code(code: i32) -> u16 {
    lookup_status(code).map_or(500, |(_, http)| http)
}

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

fn id_from_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Converts a finished span into a Datadog span.
#[must_use]
pub fn convert(span: SpanData, config: &ConverterConfig) -> DdSpan {
    let start = span
        .start_time
        .duration_since(UNIX_EPOCH)
        .map_or(0, nanos);

    let mut dd_span = DdSpan {
        trace_id: id_from_be(&span.trace_id.0[8..]),
        span_id: id_from_be(&span.span_id.0),
        parent_id: span
            .parent_span_id
            .filter(|parent| !parent.is_zero())
            .map_or(0, |parent| id_from_be(&parent.0)),
        name: DEFAULT_OPERATION_NAME.to_string(),
        resource: span.name,
        service: config.service.clone(),
        start,
        duration: nanos(span.duration),
        ..DdSpan::default()
    };

    let code = http_code(span.status.code);
    match span.kind {
        SpanKind::Client => {
            dd_span.r#type = SPAN_TYPE_CLIENT.to_string();
            if (400..500).contains(&code) {
                dd_span.error = 1;
            }
        }
        SpanKind::Server => {
            dd_span.r#type = SPAN_TYPE_SERVER.to_string();
            if (500..600).contains(&code) {
                dd_span.error = 1;
            }
        }
        SpanKind::Unspecified => {
            if (500..600).contains(&code) {
                dd_span.error = 1;
            }
        }
    }

    let message = status_message(span.status.code);
    if dd_span.error == 1 {
        dd_span
            .meta
            .insert(ERROR_TYPE_KEY.to_string(), message.clone());
        if !span.status.message.is_empty() {
            dd_span
                .meta
                .insert(ERROR_MSG_KEY.to_string(), span.status.message.clone());
        }
    }

    dd_span
        .meta
        .insert(STATUS_CODE_KEY.to_string(), span.status.code.to_string());
    dd_span.meta.insert(STATUS_KEY.to_string(), message);
    if !span.status.message.is_empty() {
        dd_span
            .meta
            .insert(STATUS_DESCRIPTION_KEY.to_string(), span.status.message);
    }

    for (key, value) in &config.global_tags {
        set_tag(&mut dd_span, key, value);
    }
    for (key, value) in &span.attributes {
        set_tag(&mut dd_span, key, value);
    }
    dd_span
}

/// Applies a single attribute to the span, honoring reserved keys.
#[allow(clippy::cast_precision_loss)]
pub fn set_tag(span: &mut DdSpan, key: &str, value: &AttributeValue) {
    if key == ERROR_KEY {
        set_error(span, value);
        return;
    }
    match value {
        AttributeValue::String(v) => set_string_tag(span, key, v),
        AttributeValue::Bool(v) => set_string_tag(span, key, if *v { "true" } else { "false" }),
        AttributeValue::Int(v) => set_metric(span, key, *v as f64),
        AttributeValue::Float(v) => set_metric(span, key, *v),
    }
}

fn set_metric(span: &mut DdSpan, key: &str, value: f64) {
    match key {
        SAMPLING_PRIORITY_KEY => {
            span.metrics
                .insert(SAMPLING_PRIORITY_METRIC_KEY.to_string(), value);
        }
        ANALYTICS_EVENT_KEY => {
            let rate = if value.abs() > 0.0 { 1.0 } else { 0.0 };
            span.metrics.insert(EVENT_SAMPLE_RATE_KEY.to_string(), rate);
        }
        _ => {
            span.metrics.insert(key.to_string(), value);
        }
    }
}

fn set_string_tag(span: &mut DdSpan, key: &str, value: &str) {
    match key {
        SERVICE_NAME_KEY => span.service = value.to_string(),
        RESOURCE_NAME_KEY => span.resource = value.to_string(),
        SPAN_TYPE_KEY => span.r#type = value.to_string(),
        SPAN_NAME_KEY => span.name = value.to_string(),
        ANALYTICS_EVENT_KEY => {
            let rate = if value == "false" { 0.0 } else { 1.0 };
            set_metric(span, EVENT_SAMPLE_RATE_KEY, rate);
        }
        _ => {
            span.meta.insert(key.to_string(), value.to_string());
        }
    }
}

fn set_error(span: &mut DdSpan, value: &AttributeValue) {
    match value {
        AttributeValue::String(msg) => {
            span.error = 1;
            span.meta.insert(ERROR_MSG_KEY.to_string(), msg.clone());
        }
        AttributeValue::Bool(v) => span.error = i32::from(*v),
        AttributeValue::Int(v) => span.error = i32::from(*v > 0),
        // Anything else is treated as an error.
        AttributeValue::Float(_) => span.error = 1,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::traces::span::{SpanId, Status, TraceId};
    use proptest::prelude::*;
    use std::time::SystemTime;

    fn config() -> ConverterConfig {
        ConverterConfig {
            service: "my-service".to_string(),
            global_tags: BTreeMap::new(),
        }
    }

    fn span_with(kind: SpanKind, code: i32) -> SpanData {
        SpanData {
            trace_id: TraceId([1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 42]),
            span_id: SpanId([0, 0, 0, 0, 0, 0, 0, 7]),
            name: "/users/get".to_string(),
            kind,
            status: Status {
                code,
                message: "boom".to_string(),
            },
            ..SpanData::default()
        }
    }

    #[test]
    fn test_ids_and_timing() {
        let mut span = span_with(SpanKind::Server, status_codes::OK);
        span.parent_span_id = Some(SpanId([0, 0, 0, 0, 0, 0, 1, 0]));
        span.start_time = UNIX_EPOCH + Duration::from_secs(3);
        span.duration = Duration::from_millis(5);

        let dd_span = convert(span, &config());
        assert_eq!(dd_span.trace_id, 42);
        assert_eq!(dd_span.span_id, 7);
        assert_eq!(dd_span.parent_id, 256);
        assert_eq!(dd_span.start, 3_000_000_000);
        assert_eq!(dd_span.duration, 5_000_000);
        assert_eq!(dd_span.name, DEFAULT_OPERATION_NAME);
        assert_eq!(dd_span.resource, "/users/get");
        assert_eq!(dd_span.service, "my-service");
        assert_eq!(dd_span.r#type, "server");
    }

    #[test]
    fn test_zero_parent_is_root() {
        let mut span = span_with(SpanKind::Client, status_codes::OK);
        span.parent_span_id = Some(SpanId::default());
        let dd_span = convert(span, &config());
        assert!(dd_span.is_root());
        assert_eq!(dd_span.r#type, "client");
    }

    #[test]
    fn test_start_before_epoch() {
        let mut span = span_with(SpanKind::Client, status_codes::OK);
        span.start_time = SystemTime::UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(convert(span, &config()).start, 0);
    }

    #[test]
    fn test_server_not_found_is_not_error() {
        let dd_span = convert(span_with(SpanKind::Server, status_codes::NOT_FOUND), &config());
        assert_eq!(http_code(status_codes::NOT_FOUND), 404);
        assert_eq!(dd_span.error, 0);
        assert!(!dd_span.meta.contains_key(ERROR_TYPE_KEY));
        assert_eq!(dd_span.meta.get(STATUS_CODE_KEY).unwrap(), "5");
        assert_eq!(dd_span.meta.get(STATUS_KEY).unwrap(), "not_found");
        assert_eq!(dd_span.meta.get(STATUS_DESCRIPTION_KEY).unwrap(), "boom");
    }

    #[test]
    fn test_server_internal_is_error() {
        let dd_span = convert(span_with(SpanKind::Server, status_codes::INTERNAL), &config());
        assert_eq!(dd_span.error, 1);
        assert_eq!(dd_span.meta.get(ERROR_TYPE_KEY).unwrap(), "internal");
        assert_eq!(dd_span.meta.get(ERROR_MSG_KEY).unwrap(), "boom");
    }

    #[test]
    fn test_client_errors_on_4xx_only() {
        let not_found = convert(span_with(SpanKind::Client, status_codes::NOT_FOUND), &config());
        assert_eq!(not_found.error, 1);
        assert_eq!(not_found.meta.get(ERROR_TYPE_KEY).unwrap(), "not_found");

        let internal = convert(span_with(SpanKind::Client, status_codes::INTERNAL), &config());
        assert_eq!(internal.error, 0);
    }

    #[test]
    fn test_unknown_status_code() {
        assert_eq!(http_code(99), 500);
        assert_eq!(status_message(99), "error code 99");
        let dd_span = convert(span_with(SpanKind::Unspecified, 99), &config());
        assert_eq!(dd_span.error, 1);
        assert_eq!(dd_span.meta.get(ERROR_TYPE_KEY).unwrap(), "error code 99");
    }

    #[test]
    fn test_span_attributes_override_global_tags() {
        let mut config = config();
        config
            .global_tags
            .insert("team".to_string(), AttributeValue::from("core"));
        config
            .global_tags
            .insert("region".to_string(), AttributeValue::from("us1"));

        let mut span = span_with(SpanKind::Server, status_codes::OK);
        span.attributes
            .insert("team".to_string(), AttributeValue::from("edge"));

        let dd_span = convert(span, &config);
        assert_eq!(dd_span.meta.get("team").unwrap(), "edge");
        assert_eq!(dd_span.meta.get("region").unwrap(), "us1");
    }

    #[test]
    fn test_reserved_string_keys() {
        let mut span = span_with(SpanKind::Server, status_codes::OK);
        for (key, value) in [
            (SERVICE_NAME_KEY, "billing"),
            (RESOURCE_NAME_KEY, "GET /invoices"),
            (SPAN_TYPE_KEY, "web"),
            (SPAN_NAME_KEY, "http.request"),
        ] {
            span.attributes
                .insert(key.to_string(), AttributeValue::from(value));
        }

        let dd_span = convert(span, &config());
        assert_eq!(dd_span.service, "billing");
        assert_eq!(dd_span.resource, "GET /invoices");
        assert_eq!(dd_span.r#type, "web");
        assert_eq!(dd_span.name, "http.request");
        assert!(!dd_span.meta.contains_key(SERVICE_NAME_KEY));
    }

    #[test]
    fn test_value_types() {
        let mut dd_span = DdSpan::default();
        set_tag(&mut dd_span, "flag", &AttributeValue::Bool(true));
        set_tag(&mut dd_span, "count", &AttributeValue::Int(3));
        set_tag(&mut dd_span, "ratio", &AttributeValue::Float(0.5));
        set_tag(&mut dd_span, SAMPLING_PRIORITY_KEY, &AttributeValue::Int(2));

        assert_eq!(dd_span.meta.get("flag").unwrap(), "true");
        assert_eq!(dd_span.metrics.get("count"), Some(&3.0));
        assert_eq!(dd_span.metrics.get("ratio"), Some(&0.5));
        assert_eq!(dd_span.metrics.get(SAMPLING_PRIORITY_METRIC_KEY), Some(&2.0));
        assert!(!dd_span.metrics.contains_key(SAMPLING_PRIORITY_KEY));
    }

    #[test]
    fn test_analytics_event() {
        let mut dd_span = DdSpan::default();
        set_tag(&mut dd_span, ANALYTICS_EVENT_KEY, &AttributeValue::Bool(true));
        assert_eq!(dd_span.metrics.get(EVENT_SAMPLE_RATE_KEY), Some(&1.0));
        set_tag(&mut dd_span, ANALYTICS_EVENT_KEY, &AttributeValue::from("false"));
        assert_eq!(dd_span.metrics.get(EVENT_SAMPLE_RATE_KEY), Some(&0.0));
        set_tag(&mut dd_span, ANALYTICS_EVENT_KEY, &AttributeValue::Int(1));
        assert_eq!(dd_span.metrics.get(EVENT_SAMPLE_RATE_KEY), Some(&1.0));
        assert!(!dd_span.meta.contains_key(ANALYTICS_EVENT_KEY));
    }

    #[test]
    fn test_error_key_overrides() {
        let mut dd_span = DdSpan::default();

        set_tag(&mut dd_span, ERROR_KEY, &AttributeValue::from("disk full"));
        assert_eq!(dd_span.error, 1);
        assert_eq!(dd_span.meta.get(ERROR_MSG_KEY).unwrap(), "disk full");

        set_tag(&mut dd_span, ERROR_KEY, &AttributeValue::Bool(false));
        assert_eq!(dd_span.error, 0);

        set_tag(&mut dd_span, ERROR_KEY, &AttributeValue::Int(4));
        assert_eq!(dd_span.error, 1);

        set_tag(&mut dd_span, ERROR_KEY, &AttributeValue::Int(0));
        assert_eq!(dd_span.error, 0);

        set_tag(&mut dd_span, ERROR_KEY, &AttributeValue::Float(0.0));
        assert_eq!(dd_span.error, 1);
        assert!(!dd_span.meta.contains_key(ERROR_KEY));
    }

    #[test]
    fn test_error_attribute_clears_status_error() {
        let mut span = span_with(SpanKind::Server, status_codes::UNAVAILABLE);
        span.attributes
            .insert(ERROR_KEY.to_string(), AttributeValue::Bool(false));
        let dd_span = convert(span, &config());
        assert_eq!(dd_span.error, 0);
        // the status derived tags stay
        assert_eq!(dd_span.meta.get(ERROR_TYPE_KEY).unwrap(), "unavailable");
    }

    fn kind_strategy() -> impl Strategy<Value = SpanKind> {
        prop_oneof![
            Just(SpanKind::Unspecified),
            Just(SpanKind::Client),
            Just(SpanKind::Server),
        ]
    }

    proptest! {
        #[test]
        fn prop_error_flag_follows_kind_and_http_code(kind in kind_strategy(), code in -2i32..20) {
            let http = http_code(code);
            let dd_span = convert(span_with(kind, code), &config());
            let expected = match kind {
                SpanKind::Client => (400..500).contains(&http),
                SpanKind::Server | SpanKind::Unspecified => (500..600).contains(&http),
            };
            prop_assert_eq!(dd_span.error, i32::from(expected));
            prop_assert_eq!(dd_span.meta.contains_key(ERROR_TYPE_KEY), expected);
        }
    }
}
