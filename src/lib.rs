//! Callback-driven asynchronous file reads and writes on an owned worker pool.
//!
//! - [`dispatch`]: the [`TaskDispatcher`] worker pool and its run helpers.
//! - [`fs`]: the [`AsyncFileUtil`] facade, completion tracking and metrics.
//! - [`common`]: configuration, errors and logger setup.

pub mod common;
pub mod dispatch;
pub mod fs;

pub use common::config::{DispatcherConfig, FileUtilConfig};
pub use common::exception::{DispatchError, FileIoError};
pub use dispatch::TaskDispatcher;
pub use fs::{AsyncFileUtil, OperationHandle, OperationResult, ReadOutcome};
