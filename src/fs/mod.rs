pub mod completion;
pub mod executor;
pub mod file_util;
pub mod handle;
pub mod metrics;
pub mod operation_status;
pub mod operations;
mod pending;

pub use completion::{CompletionTracker, CompletionTrackerConfig, OperationEvent, OperationStats};
pub use executor::{FileOperationExecutor, ReadOutcome};
pub use file_util::{AsyncFileUtil, ReadCallback, WriteCallback};
pub use handle::{BatchHandle, BatchReport, OperationHandle};
pub use metrics::{IOMetrics, MetricsSnapshot};
pub use operation_status::{OperationId, OperationResult};
pub use pending::Callback;
