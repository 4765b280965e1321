use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::fs::operation_status::OperationId;

/// Errors raised by the task dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatcher '{0}' has been shut down")]
    Shutdown(String),
    #[error("failed to build worker pool: {0}")]
    PoolBuild(#[source] io::Error),
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by asynchronous and synchronous file operations.
#[derive(Error, Debug)]
pub enum FileIoError {
    #[error("No file at path: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("File {} is {len} bytes, which exceeds the addressable buffer size", path.display())]
    FileTooLarge { path: PathBuf, len: u64 },
    #[error("Operation {0} was abandoned before it completed")]
    Abandoned(OperationId),
    #[error("Operation {0} not found")]
    UnknownOperation(OperationId),
    #[error("Operation {0} is not pending")]
    NotPending(OperationId),
    #[error("Timed out after {after:?} waiting for operation {id}")]
    Timeout { id: OperationId, after: Duration },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl FileIoError {
    /// Wraps an I/O error raised while performing `action` on `path`.
    ///
    /// `NotFound` errors collapse into [`FileIoError::NotFound`] so a file that
    /// disappears between the existence check and the open reports the same
    /// way as one that was never there.
    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return FileIoError::NotFound(path.to_path_buf());
        }

        FileIoError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FileIoError::NotFound(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, FileIoError::Dispatch(DispatchError::Shutdown(_)))
    }
}
