use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::exception::FileIoError;
use crate::fs::operations::{FileOperation, FileOperationType};

/// Result of a read: how many bytes were read and the buffer they were read into.
///
/// `data` is always sized to the file length observed when the read was issued.
/// If the file shrank in the meantime, only the first `bytes_read` bytes are
/// meaningful and the rest are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes_read: usize,
    pub data: Vec<u8>,
}

impl ReadOutcome {
    /// The bytes actually read
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.bytes_read]
    }
}

/// What an executed operation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Written(usize),
    Read(ReadOutcome),
}

/// Runs file operations against the filesystem.
///
/// Each operation opens its own handle, and that handle is dropped (closing
/// the file) when the operation returns, on success and on every error path.
#[derive(Debug, Clone, Default)]
pub struct FileOperationExecutor {
    /// Call `sync_all` after each write
    sync_on_write: bool,
}

impl FileOperationExecutor {
    pub fn new(sync_on_write: bool) -> Self {
        Self { sync_on_write }
    }

    /// Executes a single file operation
    pub async fn execute_operation(
        &self,
        operation: FileOperation,
    ) -> Result<ExecutionOutcome, FileIoError> {
        log::trace!(
            "Executing {} operation {} on {} after {:?} queued",
            operation.kind(),
            operation.id,
            operation.path().display(),
            operation.submitted_at.elapsed()
        );

        match operation.operation_type {
            FileOperationType::Write { path, data } => self
                .write_file(&path, &data)
                .await
                .map(ExecutionOutcome::Written),
            FileOperationType::Read { path, len } => self
                .read_file(&path, len)
                .await
                .map(ExecutionOutcome::Read),
        }
    }

    /// Replaces the contents of `path` with `data`, creating the file if needed.
    /// Returns the number of bytes written.
    pub async fn write_file(&self, path: &Path, data: &[u8]) -> Result<usize, FileIoError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| FileIoError::io("open", path, e))?;

        file.write_all(data)
            .await
            .map_err(|e| FileIoError::io("write", path, e))?;
        file.flush()
            .await
            .map_err(|e| FileIoError::io("flush", path, e))?;

        if self.sync_on_write {
            file.sync_all()
                .await
                .map_err(|e| FileIoError::io("sync", path, e))?;
        }

        Ok(data.len())
    }

    /// Reads up to `len` bytes from the start of `path`, stopping early at end of file.
    pub async fn read_file(&self, path: &Path, len: usize) -> Result<ReadOutcome, FileIoError> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(|e| FileIoError::io("open", path, e))?;

        let mut data = vec![0u8; len];
        let mut bytes_read = 0;
        while bytes_read < len {
            let n = file
                .read(&mut data[bytes_read..])
                .await
                .map_err(|e| FileIoError::io("read", path, e))?;
            if n == 0 {
                break;
            }
            bytes_read += n;
        }

        Ok(ReadOutcome { bytes_read, data })
    }
}
