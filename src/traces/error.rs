// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the `traces` module

use std::fmt;

/// Class of an export failure, used to amortize reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// A span or payload could not be encoded.
    Encoding,
    /// The intake queue was full and a span was dropped.
    Overflow,
    /// A payload could not be delivered to the agent.
    Transport,
}

impl ErrorKind {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Encoding => "error(s) encoding",
            ErrorKind::Overflow => "span buffer overflow",
            ErrorKind::Transport => "error(s) transporting",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Failures raised while exporting spans. None of them stops the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to encode span: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),
    #[error("failed to write payload: {0}")]
    PayloadWrite(String),
    #[error("intake queue is full")]
    Overflow,
    #[error("request to the agent failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("too many uploads in flight, payload of {traces} traces dropped")]
    TooManyUploads { traces: usize },
    #[error("failed to parse agent response: {0}")]
    ResponseParse(#[from] serde_json::Error),
    #[error("trace exporter is shut down")]
    Shutdown,
}

impl ExportError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Encoding(_) | ExportError::PayloadWrite(_) => ErrorKind::Encoding,
            ExportError::Overflow => ErrorKind::Overflow,
            ExportError::Request(_)
            | ExportError::Status { .. }
            | ExportError::TooManyUploads { .. }
            | ExportError::ResponseParse(_)
            | ExportError::Shutdown => ErrorKind::Transport,
        }
    }
}

impl<E: fmt::Debug + rmp::encode::RmpWriteErr> From<rmp::encode::ValueWriteError<E>> for ExportError {
    fn from(err: rmp::encode::ValueWriteError<E>) -> Self {
        ExportError::PayloadWrite(format!("{err:?}"))
    }
}

/// Aggregated report of every error of one kind seen during a report window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmortizedError {
    pub kind: ErrorKind,
    pub count: u64,
    pub first: Option<String>,
}

impl fmt::Display for AmortizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(first) = &self.first {
            write!(f, ": {first}")?;
        }
        if self.count > 1 {
            write!(f, " (x{})", self.count)?;
        }
        Ok(())
    }
}

impl std::error::Error for AmortizedError {}
