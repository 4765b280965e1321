// Task Dispatcher Module
//
// This module owns the worker pool that every asynchronous file operation runs
// on, and exposes the generic "run this", "run these", "run this repeatedly"
// and "run this then call back" helpers on top of it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::common::config::DispatcherConfig;
use crate::common::exception::DispatchError;

/// A boxed unit of work, for callers that need to mix task types in one batch.
pub type Task = BoxFuture<'static, ()>;

/// Counts dispatched units that have not finished yet.
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            in_flight: Arc::clone(self),
        }
    }

    fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks the calling thread until no units are in flight or `timeout` elapses.
    /// Returns true if the pool drained.
    fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Held by a running unit; releases its in-flight slot on completion or drop.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.in_flight.count.lock();
        *count -= 1;
        if *count == 0 {
            self.in_flight.drained.notify_all();
        }
    }
}

/// Explicitly owned worker pool with fire-and-forget and fire-and-continue helpers.
///
/// The pool is created by [`TaskDispatcher::new`] and torn down by
/// [`TaskDispatcher::close`] (or on drop). Once closed, every `run_*` method
/// returns [`DispatchError::Shutdown`] instead of queueing work that would never run.
#[derive(Debug)]
pub struct TaskDispatcher {
    /// Pool name, also used as the worker thread name
    name: String,

    /// The owned runtime; taken out on close
    runtime: Mutex<Option<Runtime>>,

    /// Spawn handle into the runtime
    handle: Handle,

    /// Set once close() has been requested
    shutdown_flag: Arc<AtomicBool>,

    /// Wakes periodic schedules so they exit promptly on close
    shutdown_signal: Arc<Notify>,

    /// Units submitted but not yet finished
    in_flight: Arc<InFlight>,

    worker_threads: usize,
    shutdown_timeout: Duration,
}

impl TaskDispatcher {
    /// Builds a new worker pool from `config`.
    pub fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(DispatchError::PoolBuild)?;
        let handle = runtime.handle().clone();

        log::info!(
            "Started dispatcher '{}' with {} worker threads",
            config.thread_name,
            config.worker_threads
        );

        Ok(Self {
            name: config.thread_name.clone(),
            runtime: Mutex::new(Some(runtime)),
            handle,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            in_flight: Arc::new(InFlight::default()),
            worker_threads: config.worker_threads,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Builds a pool sized to the number of available CPUs.
    pub fn with_default_config() -> Result<Self, DispatchError> {
        Self::new(&DispatcherConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Number of dispatched units that have not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Returns an error if the pool no longer accepts work.
    pub fn ensure_running(&self) -> Result<(), DispatchError> {
        if self.is_shutdown() {
            return Err(DispatchError::Shutdown(self.name.clone()));
        }
        Ok(())
    }

    /// Submits a single unit of work and returns without waiting for it.
    pub fn run_async<F>(&self, task: F) -> Result<JoinHandle<F::Output>, DispatchError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.ensure_running()?;
        Ok(self.spawn_tracked(task))
    }

    /// Submits every task to the pool. Tasks run independently, in no particular order.
    pub fn run_parallel<I, F>(&self, tasks: I) -> Result<Vec<JoinHandle<()>>, DispatchError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_running()?;

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| self.spawn_tracked(task))
            .collect();

        log::trace!(
            "Dispatcher '{}' submitted {} parallel tasks",
            self.name,
            handles.len()
        );
        Ok(handles)
    }

    /// Runs each task repeatedly with `delay_secs` seconds between the end of one
    /// run and the start of the next, starting immediately, until the pool is closed.
    pub fn run_periodic<I, F, Fut>(
        &self,
        delay_secs: u64,
        tasks: I,
    ) -> Result<Vec<JoinHandle<()>>, DispatchError>
    where
        I: IntoIterator<Item = F>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_periodic_with_delay(Duration::from_secs(delay_secs), tasks)
    }

    /// Same as [`run_periodic`](Self::run_periodic) with an arbitrary delay.
    ///
    /// A run that panics is logged and ends that task's schedule; the other
    /// schedules keep going.
    pub fn run_periodic_with_delay<I, F, Fut>(
        &self,
        delay: Duration,
        tasks: I,
    ) -> Result<Vec<JoinHandle<()>>, DispatchError>
    where
        I: IntoIterator<Item = F>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_running()?;

        let handles = tasks
            .into_iter()
            .enumerate()
            .map(|(schedule_id, task)| {
                let shutdown_flag = Arc::clone(&self.shutdown_flag);
                let shutdown_signal = Arc::clone(&self.shutdown_signal);
                let name = self.name.clone();

                self.spawn_tracked(async move {
                    Self::periodic_loop(
                        schedule_id,
                        name,
                        delay,
                        task,
                        shutdown_flag,
                        shutdown_signal,
                    )
                    .await;
                })
            })
            .collect();

        Ok(handles)
    }

    async fn periodic_loop<F, Fut>(
        schedule_id: usize,
        name: String,
        delay: Duration,
        task: F,
        shutdown_flag: Arc<AtomicBool>,
        shutdown_signal: Arc<Notify>,
    ) where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        log::debug!("Dispatcher '{}' started periodic task {}", name, schedule_id);

        loop {
            if shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            if let Err(panic) = AssertUnwindSafe(task()).catch_unwind().await {
                log::error!(
                    "Periodic task {} on dispatcher '{}' panicked, suppressing further runs: {}",
                    schedule_id,
                    name,
                    panic_message(panic.as_ref())
                );
                return;
            }

            // Register for the signal before re-checking the flag so a close()
            // in between cannot be missed.
            let notified = shutdown_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut notified => break,
            }
        }

        log::debug!("Dispatcher '{}' stopped periodic task {}", name, schedule_id);
    }

    /// Runs `producer` on the pool, then calls `callback` with its output on the
    /// same worker. Panics in either are caught and logged.
    pub fn run_with_callback<P, T, C>(
        &self,
        producer: P,
        callback: C,
    ) -> Result<JoinHandle<()>, DispatchError>
    where
        P: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let name = self.name.clone();

        self.run_async(async move {
            let value = match AssertUnwindSafe(producer).catch_unwind().await {
                Ok(value) => value,
                Err(panic) => {
                    log::error!(
                        "Task on dispatcher '{}' panicked before its callback ran: {}",
                        name,
                        panic_message(panic.as_ref())
                    );
                    return;
                }
            };

            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                log::error!(
                    "Callback on dispatcher '{}' panicked: {}",
                    name,
                    panic_message(panic.as_ref())
                );
            }
        })
    }

    fn spawn_tracked<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.in_flight.enter();
        self.handle.spawn(async move {
            let _guard = guard;
            task.await
        })
    }

    /// Stops accepting work, lets in-flight units finish (bounded by the
    /// configured shutdown timeout) and then shuts the pool down.
    ///
    /// Safe to call more than once and safe to call from inside a task or
    /// callback running on this pool: in that case the drain happens on a
    /// helper thread and this call returns immediately.
    pub fn close(&self) {
        if self.shutdown_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_signal.notify_waiters();

        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        log::info!(
            "Shutting down dispatcher '{}' with {} tasks in flight",
            self.name,
            self.in_flight.count()
        );

        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.shutdown_timeout;
        let name = self.name.clone();

        if Handle::try_current().is_err() {
            drain_and_shutdown(&name, runtime, &in_flight, timeout);
            return;
        }

        // Blocking here would stall a runtime worker, possibly the one running
        // the caller. Hand the runtime to a helper thread once it exists.
        let (sender, receiver) = mpsc::channel::<Runtime>();
        let spawned = thread::Builder::new()
            .name(format!("{}-shutdown", self.name))
            .spawn(move || {
                if let Ok(runtime) = receiver.recv() {
                    drain_and_shutdown(&name, runtime, &in_flight, timeout);
                }
            });

        match spawned {
            Ok(_) => {
                if let Err(mpsc::SendError(runtime)) = sender.send(runtime) {
                    runtime.shutdown_background();
                }
            }
            Err(e) => {
                log::error!(
                    "Failed to start shutdown thread for dispatcher '{}', abandoning in-flight tasks: {}",
                    self.name,
                    e
                );
                runtime.shutdown_background();
            }
        }
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            log::debug!("Dispatcher '{}' dropped without close(), closing", self.name);
        }
        self.close();
    }
}

fn drain_and_shutdown(name: &str, runtime: Runtime, in_flight: &InFlight, timeout: Duration) {
    if !in_flight.wait_drained(timeout) {
        log::warn!(
            "Dispatcher '{}' abandoning {} unfinished tasks after {:?}",
            name,
            in_flight.count(),
            timeout
        );
    }
    runtime.shutdown_timeout(timeout);
    log::info!("Dispatcher '{}' shut down", name);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
