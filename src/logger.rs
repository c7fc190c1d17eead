// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use tracing::{Event, Subscriber, debug};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::log_level::LogLevel;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("could not parse log level in configuration: {0}")]
    Filter(#[from] ParseError),
    #[error("setting default subscriber failed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Single line event format: `DD_TRACE_EXPORTER | LEVEL | message fields`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "DD_TRACE_EXPORTER | {} | ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// The configured level applies everywhere except the HTTP stack, which is
/// silenced.
fn env_filter(level: LogLevel) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(format!(
        "h2=off,hyper=off,rustls=off,{}",
        level.as_level_filter()
    ))
}

/// Installs the global `tracing` subscriber. Fails if one is already set.
pub fn init(level: LogLevel) -> Result<(), LoggerError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(level)?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    debug!("Logging subsystem enabled");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_formatter() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter(LogLevel::Info).unwrap())
            .with_writer(move || writer.clone())
            .event_format(Formatter)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("TRACES | Flushing {} traces", 3);
            tracing::debug!("filtered out");
            tracing::info!(target: "hyper::client", "connection reused");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output, "DD_TRACE_EXPORTER | INFO | TRACES | Flushing 3 traces\n");
    }

    #[test]
    fn test_env_filter_uses_configured_level() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let filter = env_filter(level).unwrap();
            assert_eq!(filter.max_level_hint(), Some(level.as_level_filter()));
        }
    }
}
