//! # File Operation Status
//!
//! State machine and result types for tracking one asynchronous file operation.
//! The caller holds the receiving half of a oneshot channel; the worker that
//! finishes the operation moves the status from `Pending` to `Completed`, which
//! sends the result to that receiver.
//!
//! ```text
//!   ┌─────────────┐   complete(result)   ┌─────────────┐
//!   │   Pending   │ ───────────────────► │  Completed  │
//!   │ started_at  │                      │ started_at  │
//!   │ notifier    │                      │ completed_at│
//!   └─────────────┘                      │ result      │
//!                                        └─────────────┘
//! ```
//!
//! | Type              | Description                                          |
//! |-------------------|------------------------------------------------------|
//! | `OperationId`     | Type alias for `u64`, unique operation identifier    |
//! | `OperationResult` | `Success { bytes }` or `Error(String)`               |
//! | `OperationStatus` | Pending → Completed                                  |
//!
//! Transitions consume `self`, so a status can never be completed twice.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::fs::operations::FileOperationKind;

/// Unique identifier for file operations
pub type OperationId = u64;

/// Outcome of a file operation, as published to handles and event subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Success { bytes: usize },
    Error(String),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Bytes transferred, or `None` if the operation failed.
    pub fn bytes(&self) -> Option<usize> {
        match self {
            Self::Success { bytes } => Some(*bytes),
            Self::Error(_) => None,
        }
    }
}

/// Status of a tracked file operation
#[derive(Debug)]
pub enum OperationStatus {
    Pending {
        kind: FileOperationKind,
        path: PathBuf,
        started_at: Instant,
        notifier: oneshot::Sender<OperationResult>,
    },
    Completed {
        kind: FileOperationKind,
        path: PathBuf,
        started_at: Instant,
        completed_at: Instant,
        result: OperationResult,
    },
}

impl OperationStatus {
    /// Creates a new pending operation
    pub fn new_pending(
        kind: FileOperationKind,
        path: PathBuf,
    ) -> (Self, oneshot::Receiver<OperationResult>) {
        let (tx, rx) = oneshot::channel();
        let status = Self::Pending {
            kind,
            path,
            started_at: Instant::now(),
            notifier: tx,
        };
        (status, rx)
    }

    /// Completes the operation, waking whoever holds the receiver
    pub fn complete(self, result: OperationResult) -> Self {
        match self {
            Self::Pending {
                kind,
                path,
                started_at,
                notifier,
            } => {
                // The receiver may already be gone
                let _ = notifier.send(result.clone());

                Self::Completed {
                    kind,
                    path,
                    started_at,
                    completed_at: Instant::now(),
                    result,
                }
            }
            completed => completed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn kind(&self) -> FileOperationKind {
        match self {
            Self::Pending { kind, .. } | Self::Completed { kind, .. } => *kind,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Pending { path, .. } | Self::Completed { path, .. } => path,
        }
    }

    /// The final result, if the operation has completed
    pub fn result(&self) -> Option<&OperationResult> {
        match self {
            Self::Completed { result, .. } => Some(result),
            Self::Pending { .. } => None,
        }
    }

    /// Time since the operation started
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Pending { started_at, .. } | Self::Completed { started_at, .. } => {
                started_at.elapsed()
            }
        }
    }

    /// Time the operation took, once completed
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Completed {
                started_at,
                completed_at,
                ..
            } => Some(completed_at.duration_since(*started_at)),
            Self::Pending { .. } => None,
        }
    }

    /// How long ago the operation completed
    pub(crate) fn completed_for(&self) -> Option<Duration> {
        match self {
            Self::Completed { completed_at, .. } => Some(completed_at.elapsed()),
            Self::Pending { .. } => None,
        }
    }
}
