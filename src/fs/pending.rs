//! Exactly-once delivery of an operation's outcome.
//!
//! A [`PendingOperation`] owns the caller's callback for one issued operation.
//! It is moved into the future that performs the I/O and is consumed by
//! [`PendingOperation::finish`]. If that future is dropped first (the pool was
//! shut down underneath it), `Drop` delivers an `Abandoned` error instead, so
//! the callback and the operation handle still see exactly one outcome.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::exception::FileIoError;
use crate::dispatch::dispatcher::panic_message;
use crate::fs::completion::CompletionTracker;
use crate::fs::executor::{ExecutionOutcome, ReadOutcome};
use crate::fs::operation_status::{OperationId, OperationResult};
use crate::fs::operations::FileOperationKind;

/// A callback receiving the outcome of one operation
pub type Callback<T> = Box<dyn FnOnce(Result<T, FileIoError>) + Send + 'static>;

/// Values an operation can hand to its callback
pub(crate) trait OperationOutput: Send + Sized + 'static {
    fn from_outcome(outcome: ExecutionOutcome) -> Option<Self>;

    fn bytes_transferred(&self) -> usize;
}

impl OperationOutput for usize {
    fn from_outcome(outcome: ExecutionOutcome) -> Option<Self> {
        match outcome {
            ExecutionOutcome::Written(bytes) => Some(bytes),
            ExecutionOutcome::Read(_) => None,
        }
    }

    fn bytes_transferred(&self) -> usize {
        *self
    }
}

impl OperationOutput for ReadOutcome {
    fn from_outcome(outcome: ExecutionOutcome) -> Option<Self> {
        match outcome {
            ExecutionOutcome::Read(outcome) => Some(outcome),
            ExecutionOutcome::Written(_) => None,
        }
    }

    fn bytes_transferred(&self) -> usize {
        self.bytes_read
    }
}

pub(crate) struct PendingOperation<T: OperationOutput> {
    id: OperationId,
    kind: FileOperationKind,
    path: PathBuf,
    tracker: Arc<CompletionTracker>,
    callback: Option<Callback<T>>,
    finished: bool,
}

impl<T: OperationOutput> PendingOperation<T> {
    pub(crate) fn new(
        id: OperationId,
        kind: FileOperationKind,
        path: PathBuf,
        tracker: Arc<CompletionTracker>,
        callback: Callback<T>,
    ) -> Self {
        Self {
            id,
            kind,
            path,
            tracker,
            callback: Some(callback),
            finished: false,
        }
    }

    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Invokes the callback with `result`, then records the outcome with the
    /// tracker, which resolves the operation handle.
    pub(crate) fn finish(mut self, result: Result<T, FileIoError>) -> OperationResult {
        let operation_result = match &result {
            Ok(value) => {
                log::debug!(
                    "{} operation {} on {} transferred {} bytes",
                    self.kind,
                    self.id,
                    self.path.display(),
                    value.bytes_transferred()
                );
                OperationResult::Success {
                    bytes: value.bytes_transferred(),
                }
            }
            Err(e) => {
                log::warn!(
                    "{} operation {} on {} failed: {}",
                    self.kind,
                    self.id,
                    self.path.display(),
                    e
                );
                OperationResult::Error(e.to_string())
            }
        };

        self.deliver(result);
        self.record(operation_result.clone());
        operation_result
    }

    fn deliver(&mut self, result: Result<T, FileIoError>) {
        let Some(callback) = self.callback.take() else {
            return;
        };

        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(result))) {
            self.tracker.metrics().record_callback_failure();
            log::error!(
                "Callback for {} operation {} on {} panicked: {}",
                self.kind,
                self.id,
                self.path.display(),
                panic_message(panic.as_ref())
            );
        }
    }

    fn record(&mut self, result: OperationResult) {
        self.finished = true;
        if let Err(e) = self.tracker.complete_operation(self.id, result) {
            log::error!("Failed to record completion of operation {}: {}", self.id, e);
        }
    }
}

impl<T: OperationOutput> Drop for PendingOperation<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let error = FileIoError::Abandoned(self.id);
        log::warn!(
            "{} operation {} on {} abandoned before completion",
            self.kind,
            self.id,
            self.path.display()
        );
        self.tracker.metrics().record_operation_abandoned();

        let message = error.to_string();
        if std::thread::panicking() {
            // A second panic from the callback would abort the process
            self.callback = None;
        } else {
            self.deliver(Err(error));
        }
        self.record(OperationResult::Error(message));
    }
}
