//! Configuration for the dispatcher and the file facade.

use std::time::Duration;

use crate::common::exception::DispatchError;
use crate::fs::completion::CompletionTrackerConfig;

/** Name given to worker threads when none is configured. */
pub const DEFAULT_THREAD_POOL_NAME: &str = "async-file-pool";

/** How long `close()` waits for in-flight work before tearing the pool down. */
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`TaskDispatcher`](crate::dispatch::TaskDispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_threads: usize,
    pub thread_name: String,
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            thread_name: DEFAULT_THREAD_POOL_NAME.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.worker_threads == 0 {
            return Err(DispatchError::InvalidConfig(
                "worker_threads must be greater than 0".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for an [`AsyncFileUtil`](crate::fs::AsyncFileUtil).
#[derive(Debug, Clone, Default)]
pub struct FileUtilConfig {
    // Worker pool
    pub dispatcher: DispatcherConfig,

    // Completion tracking
    pub completion: CompletionTrackerConfig,

    // Durability
    pub sync_on_write: bool,
}

impl FileUtilConfig {
    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_completion(mut self, completion: CompletionTrackerConfig) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        self.dispatcher.validate()
    }
}
