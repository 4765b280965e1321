use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;

use crate::fs::operation_status::{OperationId, OperationResult};

/// Completion handle for one asynchronous file operation.
///
/// Resolves once the operation's callback has returned. Await it from async
/// code, or call [`wait`](Self::wait) from a plain thread. Dropping the handle
/// does not cancel the operation.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    receiver: oneshot::Receiver<OperationResult>,
}

impl OperationHandle {
    pub(crate) fn new(id: OperationId, receiver: oneshot::Receiver<OperationResult>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Blocks the current thread until the operation completes.
    ///
    /// Safe to call from a callback running on a pool worker, for example to
    /// chain a read after a write.
    ///
    /// # Panics
    ///
    /// Panics if called from a task on a current-thread runtime.
    pub fn wait(self) -> OperationResult {
        let id = self.id;
        block_on_receiver(self.receiver).unwrap_or_else(|_| lost_result(id))
    }

    /// Returns the result if the operation has already completed.
    pub fn try_result(&mut self) -> Option<OperationResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(lost_result(self.id)),
        }
    }
}

impl Future for OperationHandle {
    type Output = OperationResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.id;
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| lost_result(id)))
    }
}

/// Blocking receive that also works on a multi-thread runtime worker, where
/// the worker is handed off for the duration of the wait.
fn block_on_receiver<T>(receiver: oneshot::Receiver<T>) -> Result<T, oneshot::error::RecvError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| receiver.blocking_recv())
        }
        _ => receiver.blocking_recv(),
    }
}

fn lost_result(id: OperationId) -> OperationResult {
    OperationResult::Error(format!("Operation {} finished without reporting a result", id))
}

/// Per-path results of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: HashMap<PathBuf, OperationResult>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&OperationResult> {
        self.results.get(path.as_ref())
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

/// Completion handle for a batch of file operations.
///
/// Resolves to the [`BatchReport`] once every entry's callback has returned.
/// If the batch was abandoned by pool shutdown the report is empty; each
/// entry's callback still receives its own error.
#[derive(Debug)]
pub struct BatchHandle {
    receiver: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    pub(crate) fn new(receiver: oneshot::Receiver<BatchReport>) -> Self {
        Self { receiver }
    }

    /// Blocks the current thread until every entry has completed.
    ///
    /// # Panics
    ///
    /// Panics if called from a task on a current-thread runtime.
    pub fn wait(self) -> BatchReport {
        block_on_receiver(self.receiver).unwrap_or_default()
    }
}

impl Future for BatchHandle {
    type Output = BatchReport;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(Result::unwrap_or_default)
    }
}
