//! # File Operation Definitions
//!
//! Plain-data descriptions of the file operations the executor runs. Every
//! field is owned, so an operation can be built on the caller's thread and
//! moved onto a pool worker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::fs::operation_status::OperationId;

/// Direction of a file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperationKind {
    Read,
    Write,
}

impl fmt::Display for FileOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Types of file operations supported by the executor
#[derive(Debug, Clone)]
pub enum FileOperationType {
    /// Replace the contents of `path` with `data`, creating the file if needed
    Write { path: PathBuf, data: Vec<u8> },

    /// Read up to `len` bytes from the start of `path`
    Read { path: PathBuf, len: usize },
}

/// A file operation with its tracking metadata
#[derive(Debug)]
pub struct FileOperation {
    /// Id assigned by the completion tracker
    pub id: OperationId,

    pub operation_type: FileOperationType,

    /// Timestamp when the operation was submitted
    pub submitted_at: Instant,
}

impl FileOperation {
    pub fn new(id: OperationId, operation_type: FileOperationType) -> Self {
        Self {
            id,
            operation_type,
            submitted_at: Instant::now(),
        }
    }

    pub fn write(id: OperationId, path: PathBuf, data: Vec<u8>) -> Self {
        Self::new(id, FileOperationType::Write { path, data })
    }

    pub fn read(id: OperationId, path: PathBuf, len: usize) -> Self {
        Self::new(id, FileOperationType::Read { path, len })
    }

    pub fn kind(&self) -> FileOperationKind {
        match self.operation_type {
            FileOperationType::Write { .. } => FileOperationKind::Write,
            FileOperationType::Read { .. } => FileOperationKind::Read,
        }
    }

    pub fn path(&self) -> &Path {
        match &self.operation_type {
            FileOperationType::Write { path, .. } | FileOperationType::Read { path, .. } => path,
        }
    }
}
