//! # Completion Tracker
//!
//! Registry of every file operation the facade has issued. Each operation is
//! registered as `Pending` when it is submitted and moved to `Completed` exactly
//! once when its worker finishes. Completion wakes three kinds of observers:
//!
//! - the operation's own handle, through a oneshot channel,
//! - callers of [`CompletionTracker::wait_for_operation`],
//! - anyone subscribed to the broadcast event stream.
//!
//! Completed entries stay queryable for `completed_operation_ttl`, and are
//! dropped early if the registry reaches `max_tracked_operations`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};

use crate::common::exception::FileIoError;
use crate::fs::metrics::IOMetrics;
use crate::fs::operation_status::{OperationId, OperationResult, OperationStatus};
use crate::fs::operations::FileOperationKind;

/// Every this many registrations, expired completed entries are purged.
const PURGE_INTERVAL: u64 = 256;

/// Notification published when an operation completes
#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub operation_id: OperationId,
    pub kind: FileOperationKind,
    pub path: PathBuf,
    pub result: OperationResult,
}

/// Configuration for the completion tracker
#[derive(Debug, Clone)]
pub struct CompletionTrackerConfig {
    /// How long to keep completed operations for queries
    pub completed_operation_ttl: Duration,

    /// Maximum number of operations to track simultaneously
    pub max_tracked_operations: usize,

    /// Buffered events per subscriber before it starts lagging
    pub event_channel_capacity: usize,
}

impl Default for CompletionTrackerConfig {
    fn default() -> Self {
        Self {
            completed_operation_ttl: Duration::from_secs(300),
            max_tracked_operations: 10_000,
            event_channel_capacity: 1024,
        }
    }
}

/// Detailed statistics about tracked operations
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationStats {
    pub total_count: usize,
    pub pending_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}

/// Completion tracker for file operations
#[derive(Debug)]
pub struct CompletionTracker {
    /// Map of operation ID to operation status
    operations: RwLock<HashMap<OperationId, OperationStatus>>,

    metrics: Arc<IOMetrics>,

    /// Operation ID counter
    next_id: AtomicU64,

    config: CompletionTrackerConfig,

    /// Broadcast channel for operation completion notifications
    event_sender: broadcast::Sender<OperationEvent>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::with_config(CompletionTrackerConfig::default())
    }

    pub fn with_config(config: CompletionTrackerConfig) -> Self {
        let (event_sender, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            operations: RwLock::new(HashMap::new()),
            metrics: Arc::new(IOMetrics::new()),
            next_id: AtomicU64::new(1),
            config,
            event_sender,
        }
    }

    /// Registers a new pending operation and returns its id and a receiver for the result
    pub fn start_operation(
        &self,
        kind: FileOperationKind,
        path: PathBuf,
    ) -> (OperationId, oneshot::Receiver<OperationResult>) {
        let op_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (status, receiver) = OperationStatus::new_pending(kind, path);

        {
            let mut operations = self.operations.write();

            if operations.len() >= self.config.max_tracked_operations {
                // At capacity: drop every completed entry regardless of age
                Self::purge_completed(&mut operations, Duration::ZERO);
            } else if op_id % PURGE_INTERVAL == 0 {
                Self::purge_completed(&mut operations, self.config.completed_operation_ttl);
            }

            operations.insert(op_id, status);
        }

        self.metrics.record_operation_start();
        log::trace!("Registered {} operation {}", kind, op_id);

        (op_id, receiver)
    }

    /// Completes a pending operation with its final result
    pub fn complete_operation(
        &self,
        op_id: OperationId,
        result: OperationResult,
    ) -> Result<(), FileIoError> {
        let (kind, path) = {
            let mut operations = self.operations.write();

            let Some(status) = operations.remove(&op_id) else {
                return Err(FileIoError::UnknownOperation(op_id));
            };
            if !status.is_pending() {
                operations.insert(op_id, status);
                return Err(FileIoError::NotPending(op_id));
            }

            let kind = status.kind();
            let path = status.path().to_path_buf();

            // Metrics must be current by the time the handle wakes up
            match &result {
                OperationResult::Success { bytes } => {
                    self.metrics
                        .record_operation_complete(kind, status.elapsed(), *bytes as u64);
                }
                OperationResult::Error(_) => self.metrics.record_operation_failed(),
            }

            operations.insert(op_id, status.complete(result.clone()));
            (kind, path)
        };

        // No subscribers is fine
        let _ = self.event_sender.send(OperationEvent {
            operation_id: op_id,
            kind,
            path,
            result,
        });

        Ok(())
    }

    /// Returns `Some(true)` once completed, `Some(false)` while pending and
    /// `None` for ids that are unknown or already purged.
    pub fn get_operation_status(&self, op_id: OperationId) -> Option<bool> {
        self.operations
            .read()
            .get(&op_id)
            .map(OperationStatus::is_completed)
    }

    /// The final result of a completed operation
    pub fn get_operation_result(&self, op_id: OperationId) -> Option<OperationResult> {
        self.operations
            .read()
            .get(&op_id)
            .and_then(|status| status.result().cloned())
    }

    pub fn is_operation_pending(&self, op_id: OperationId) -> bool {
        matches!(
            self.operations.read().get(&op_id),
            Some(OperationStatus::Pending { .. })
        )
    }

    /// Waits for an operation to complete. The timeout only bounds the wait;
    /// the operation itself keeps running.
    pub async fn wait_for_operation(
        &self,
        op_id: OperationId,
        wait_timeout: Duration,
    ) -> Result<OperationResult, FileIoError> {
        // Subscribe before checking the map so a completion in between is not missed
        let mut events = self.event_sender.subscribe();

        match self.lookup(op_id) {
            None => return Err(FileIoError::UnknownOperation(op_id)),
            Some(Some(result)) => return Ok(result),
            Some(None) => {}
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.operation_id == op_id => return Ok(event.result),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!(
                            "Waiter for operation {} lagged by {} events, rechecking",
                            op_id,
                            skipped
                        );
                        match self.lookup(op_id) {
                            None => return Err(FileIoError::UnknownOperation(op_id)),
                            Some(Some(result)) => return Ok(result),
                            Some(None) => {}
                        }
                    }
                    Err(RecvError::Closed) => return Err(FileIoError::UnknownOperation(op_id)),
                }
            }
        };

        tokio::time::timeout(wait_timeout, wait)
            .await
            .map_err(|_| FileIoError::Timeout {
                id: op_id,
                after: wait_timeout,
            })?
    }

    /// `None` if untracked, `Some(None)` if pending, `Some(Some(result))` if completed.
    fn lookup(&self, op_id: OperationId) -> Option<Option<OperationResult>> {
        self.operations
            .read()
            .get(&op_id)
            .map(|status| status.result().cloned())
    }

    pub fn metrics(&self) -> Arc<IOMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Creates a receiver for completion events of every operation
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<OperationEvent> {
        self.event_sender.subscribe()
    }

    pub fn tracked_operations_count(&self) -> usize {
        self.operations.read().len()
    }

    pub fn pending_operations_count(&self) -> usize {
        self.operations
            .read()
            .values()
            .filter(|status| status.is_pending())
            .count()
    }

    pub fn get_operation_stats(&self) -> OperationStats {
        let operations = self.operations.read();
        let mut stats = OperationStats {
            total_count: operations.len(),
            ..OperationStats::default()
        };

        for status in operations.values() {
            match status.result() {
                None => stats.pending_count += 1,
                Some(OperationResult::Success { .. }) => stats.completed_count += 1,
                Some(OperationResult::Error(_)) => stats.failed_count += 1,
            }
        }

        stats
    }

    /// Removes completed operations older than the configured TTL.
    /// Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut operations = self.operations.write();
        Self::purge_completed(&mut operations, self.config.completed_operation_ttl)
    }

    fn purge_completed(
        operations: &mut HashMap<OperationId, OperationStatus>,
        older_than: Duration,
    ) -> usize {
        let before = operations.len();
        operations.retain(|_, status| {
            status
                .completed_for()
                .is_none_or(|completed_for| completed_for < older_than)
        });

        let removed = before - operations.len();
        if removed > 0 {
            log::debug!("Purged {} completed operations", removed);
        }
        removed
    }
}
