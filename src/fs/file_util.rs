//! # Async File Facade
//!
//! `AsyncFileUtil` issues whole-file reads and writes on a [`TaskDispatcher`]
//! and reports each outcome to a caller-supplied callback.
//!
//! ```text
//!   caller                    pool worker
//!   ──────                    ───────────
//!   save_async / read_async
//!     ├─ register with CompletionTracker
//!     ├─ dispatch ──────────► open → write/read → close
//!     └─ return handle                            │
//!                                                 ▼
//!                              callback(Ok(..) | Err(..))
//!                                                 │
//!   handle resolves ◄──────── tracker.complete_operation
//! ```
//!
//! Failures known before anything is dispatched (a missing or oversized file
//! for a single read, a closed pool) are returned directly and the callback is
//! never called. Failures after that point reach the callback, and only the
//! callback.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;

use crate::common::config::FileUtilConfig;
use crate::common::exception::FileIoError;
use crate::dispatch::TaskDispatcher;
use crate::fs::completion::{CompletionTracker, OperationEvent, OperationStats};
use crate::fs::executor::{FileOperationExecutor, ReadOutcome};
use crate::fs::handle::{BatchHandle, BatchReport, OperationHandle};
use crate::fs::metrics::IOMetrics;
use crate::fs::operation_status::{OperationId, OperationResult};
use crate::fs::operations::{FileOperation, FileOperationKind};
use crate::fs::pending::{Callback, OperationOutput, PendingOperation};

/// Callback for a write; receives the number of bytes written
pub type WriteCallback = Callback<usize>;

/// Callback for a read; receives the bytes read
pub type ReadCallback = Callback<ReadOutcome>;

/// Asynchronous, callback-driven file reads and writes
#[derive(Debug)]
pub struct AsyncFileUtil {
    dispatcher: Arc<TaskDispatcher>,
    executor: FileOperationExecutor,
    tracker: Arc<CompletionTracker>,
}

impl AsyncFileUtil {
    /// Creates a facade with its own worker pool.
    pub fn new(config: FileUtilConfig) -> Result<Self, FileIoError> {
        config.validate()?;
        let dispatcher = Arc::new(TaskDispatcher::new(&config.dispatcher)?);
        Ok(Self::with_dispatcher(dispatcher, config))
    }

    pub fn with_default_config() -> Result<Self, FileIoError> {
        Self::new(FileUtilConfig::default())
    }

    /// Creates a facade on an existing pool. The pool's own configuration wins
    /// over `config.dispatcher`.
    pub fn with_dispatcher(dispatcher: Arc<TaskDispatcher>, config: FileUtilConfig) -> Self {
        Self {
            dispatcher,
            executor: FileOperationExecutor::new(config.sync_on_write),
            tracker: Arc::new(CompletionTracker::with_config(config.completion)),
        }
    }

    /// Writes `bytes` to `path` on the pool, replacing any existing content,
    /// then calls `callback` with the number of bytes written or the error.
    pub fn save_async<B, P, C>(
        &self,
        bytes: B,
        path: P,
        callback: C,
    ) -> Result<OperationHandle, FileIoError>
    where
        B: Into<Vec<u8>>,
        P: AsRef<Path>,
        C: FnOnce(Result<usize, FileIoError>) + Send + 'static,
    {
        self.dispatcher.ensure_running()?;

        let path = path.as_ref().to_path_buf();
        let (pending, receiver) =
            self.register::<usize>(FileOperationKind::Write, path.clone(), Box::new(callback));
        let handle = OperationHandle::new(pending.id(), receiver);

        let operation = FileOperation::write(pending.id(), path, bytes.into());
        self.submit(execute(self.executor.clone(), pending, operation));

        Ok(handle)
    }

    /// Writes every entry in parallel. Each entry reports to its own callback,
    /// and one entry failing does not affect the others.
    pub fn save_batch_async(
        &self,
        entries: HashMap<PathBuf, (Vec<u8>, WriteCallback)>,
    ) -> Result<BatchHandle, FileIoError> {
        self.dispatcher.ensure_running()?;

        let operations: Vec<_> = entries
            .into_iter()
            .map(|(path, (data, callback))| {
                let (pending, _) = self.register(FileOperationKind::Write, path.clone(), callback);
                let operation = FileOperation::write(pending.id(), path, data);
                execute(self.executor.clone(), pending, operation)
            })
            .collect();

        log::debug!("Submitting batch of {} writes", operations.len());
        Ok(self.submit_batch(operations))
    }

    /// Reads the whole of `path` on the pool, then calls `callback` with the
    /// bytes read or the error.
    ///
    /// Returns [`FileIoError::NotFound`] without calling `callback` if the file
    /// does not exist.
    pub fn read_async<P, C>(&self, path: P, callback: C) -> Result<OperationHandle, FileIoError>
    where
        P: AsRef<Path>,
        C: FnOnce(Result<ReadOutcome, FileIoError>) + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let len = file_len(&path).inspect_err(|e| {
            log::warn!("Not reading {}: {}", path.display(), e);
        })?;
        self.dispatcher.ensure_running()?;

        let (pending, receiver) =
            self.register::<ReadOutcome>(FileOperationKind::Read, path.clone(), Box::new(callback));
        let handle = OperationHandle::new(pending.id(), receiver);

        let operation = FileOperation::read(pending.id(), path, len);
        self.submit(execute(self.executor.clone(), pending, operation));

        Ok(handle)
    }

    /// Reads every entry in parallel. A missing file is reported to that
    /// entry's callback as [`FileIoError::NotFound`]; other entries proceed.
    pub fn read_batch_async(
        &self,
        entries: HashMap<PathBuf, ReadCallback>,
    ) -> Result<BatchHandle, FileIoError> {
        self.dispatcher.ensure_running()?;

        let operations: Vec<_> = entries
            .into_iter()
            .map(|(path, callback)| {
                let (pending, _) = self.register(FileOperationKind::Read, path, callback);
                read_entry(self.executor.clone(), pending)
            })
            .collect();

        log::debug!("Submitting batch of {} reads", operations.len());
        Ok(self.submit_batch(operations))
    }

    /// Reads `path` on the calling thread and decodes it with `encoding`.
    /// Malformed sequences are replaced with U+FFFD.
    pub fn read_sync(
        path: impl AsRef<Path>,
        encoding: &'static Encoding,
    ) -> Result<String, FileIoError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| FileIoError::io("read", path, e))?;

        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes);
        if had_errors {
            log::warn!(
                "Replaced malformed {} sequences while decoding {}",
                encoding.name(),
                path.display()
            );
        }

        Ok(text.into_owned())
    }

    /// Closes the worker pool. Operations still running are allowed to finish;
    /// anything issued afterwards is rejected.
    pub fn close(&self) {
        self.dispatcher.close();
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_shutdown()
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> Arc<IOMetrics> {
        self.tracker.metrics()
    }

    pub fn operation_stats(&self) -> OperationStats {
        self.tracker.get_operation_stats()
    }

    /// Operations issued whose callbacks have not yet returned
    pub fn pending_operations(&self) -> usize {
        self.tracker.pending_operations_count()
    }

    pub fn subscribe_to_events(&self) -> broadcast::Receiver<OperationEvent> {
        self.tracker.subscribe_to_events()
    }

    /// Waits up to `timeout` for operation `id`. The operation is not
    /// cancelled if the wait times out.
    pub async fn wait_for_operation(
        &self,
        id: OperationId,
        timeout: Duration,
    ) -> Result<OperationResult, FileIoError> {
        self.tracker.wait_for_operation(id, timeout).await
    }

    fn register<T: OperationOutput>(
        &self,
        kind: FileOperationKind,
        path: PathBuf,
        callback: Callback<T>,
    ) -> (PendingOperation<T>, oneshot::Receiver<OperationResult>) {
        let (id, receiver) = self.tracker.start_operation(kind, path.clone());
        let pending = PendingOperation::new(id, kind, path, Arc::clone(&self.tracker), callback);
        (pending, receiver)
    }

    fn submit<F>(&self, task: F)
    where
        F: Future<Output = (PathBuf, OperationResult)> + Send + 'static,
    {
        // On failure the task is dropped, and its pending operation reports
        // itself abandoned.
        if let Err(e) = self.dispatcher.run_async(task) {
            log::warn!("Operation rejected by worker pool: {}", e);
        }
    }

    fn submit_batch<F>(&self, operations: Vec<F>) -> BatchHandle
    where
        F: Future<Output = (PathBuf, OperationResult)> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let batch = async move {
            let mut join_set = JoinSet::new();
            for operation in operations {
                join_set.spawn(operation);
            }

            let mut report = BatchReport::default();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((path, result)) => {
                        report.results.insert(path, result);
                    }
                    Err(e) => log::error!("Batch entry did not complete: {}", e),
                }
            }

            log::debug!(
                "Batch finished: {} succeeded, {} failed",
                report.succeeded(),
                report.failed()
            );
            // The caller may have dropped the handle
            let _ = sender.send(report);
        };

        if let Err(e) = self.dispatcher.run_async(batch) {
            log::warn!("Batch rejected by worker pool: {}", e);
        }
        BatchHandle::new(receiver)
    }
}

/// Runs one operation and hands its outcome to the pending operation.
async fn execute<T: OperationOutput>(
    executor: FileOperationExecutor,
    pending: PendingOperation<T>,
    operation: FileOperation,
) -> (PathBuf, OperationResult) {
    let result = executor
        .execute_operation(operation)
        .await
        .and_then(|outcome| {
            T::from_outcome(outcome).ok_or_else(|| {
                FileIoError::io(
                    "interpret result for",
                    pending.path(),
                    io::Error::new(io::ErrorKind::InvalidData, "unexpected operation outcome"),
                )
            })
        });

    let path = pending.path().to_path_buf();
    (path, pending.finish(result))
}

/// Batch read entry: sizes the file, then reads it.
async fn read_entry(
    executor: FileOperationExecutor,
    pending: PendingOperation<ReadOutcome>,
) -> (PathBuf, OperationResult) {
    let path = pending.path().to_path_buf();

    match file_len_async(&path).await {
        Ok(len) => {
            let operation = FileOperation::read(pending.id(), path, len);
            execute(executor, pending, operation).await
        }
        Err(e) => {
            log::warn!("Not reading {}: {}", path.display(), e);
            (path, pending.finish(Err(e)))
        }
    }
}

fn file_len(path: &Path) -> Result<usize, FileIoError> {
    let metadata = std::fs::metadata(path).map_err(|e| FileIoError::io("stat", path, e))?;
    checked_len(path, metadata.len())
}

async fn file_len_async(path: &Path) -> Result<usize, FileIoError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| FileIoError::io("stat", path, e))?;
    checked_len(path, metadata.len())
}

fn checked_len(path: &Path, len: u64) -> Result<usize, FileIoError> {
    fit_len(path, len)
}

/// Converts a file length into an in-memory size type without truncating.
fn fit_len<T: TryFrom<u64>>(path: &Path, len: u64) -> Result<T, FileIoError> {
    T::try_from(len).map_err(|_| FileIoError::FileTooLarge {
        path: path.to_path_buf(),
        len,
    })
}
