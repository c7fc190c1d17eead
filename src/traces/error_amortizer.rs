// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

use crate::traces::error::{AmortizedError, ErrorKind, ExportError};

/// User supplied hook receiving amortized export errors.
pub type ErrorCallback = Arc<dyn Fn(&AmortizedError) + Send + Sync>;

#[derive(Debug, Default)]
struct PendingError {
    count: u64,
    first: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    pending: BTreeMap<ErrorKind, PendingError>,
    totals: BTreeMap<ErrorKind, u64>,
}

/// Collects export errors and reports them at most once per kind per report
/// window.
///
/// `log` only records. The owner calls `flush` once per window, which hands
/// one [`AmortizedError`] per kind seen since the previous flush to the
/// callback, or to the log when no callback is set.
pub struct ErrorAmortizer {
    callback: Option<ErrorCallback>,
    state: Mutex<State>,
}

impl fmt::Debug for ErrorAmortizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorAmortizer")
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

impl ErrorAmortizer {
    #[must_use]
    pub fn new(callback: Option<ErrorCallback>) -> Self {
        ErrorAmortizer {
            callback,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn log(&self, kind: ErrorKind, err: Option<ExportError>) {
        let mut state = self.lock();
        *state.totals.entry(kind).or_default() += 1;
        let pending = state.pending.entry(kind).or_default();
        pending.count += 1;
        if pending.first.is_none() {
            pending.first = err.map(|e| e.to_string());
        }
    }

    /// Number of errors of this kind logged since creation.
    #[must_use]
    pub fn total(&self, kind: ErrorKind) -> u64 {
        self.lock().totals.get(&kind).copied().unwrap_or(0)
    }

    /// Number of errors of this kind waiting for the next report.
    #[must_use]
    pub fn pending(&self, kind: ErrorKind) -> u64 {
        self.lock().pending.get(&kind).map_or(0, |p| p.count)
    }

    /// Reports everything logged since the last flush. Returns the number of
    /// reports made.
    pub fn flush(&self) -> usize {
        let reports: Vec<AmortizedError> = {
            let mut state = self.lock();
            std::mem::take(&mut state.pending)
                .into_iter()
                .map(|(kind, pending)| AmortizedError {
                    kind,
                    count: pending.count,
                    first: pending.first,
                })
                .collect()
        };
        for report in &reports {
            self.report(report);
        }
        reports.len()
    }

    fn report(&self, report: &AmortizedError) {
        let Some(callback) = &self.callback else {
            error!("TRACES | Failed to export to Datadog: {report}");
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(report))).is_err() {
            error!("TRACES | Error callback panicked while reporting: {report}");
        }
    }
}
