use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use asyncfile::common::config::DispatcherConfig;
use asyncfile::common::exception::DispatchError;
use asyncfile::dispatch::{Task, TaskDispatcher};

use crate::assert_err;
use crate::common::tempfiles::{TEST_WORKERS, test_dispatcher};

fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn default_pool_uses_every_cpu() {
    let dispatcher = TaskDispatcher::with_default_config().unwrap();
    assert_eq!(dispatcher.worker_threads(), num_cpus::get());
    assert_eq!(dispatcher.name(), "async-file-pool");
    dispatcher.close();
}

#[test]
fn invalid_pool_size_is_rejected() {
    let config = DispatcherConfig::default().with_worker_threads(0);
    let err = assert_err!(TaskDispatcher::new(&config));
    assert!(matches!(err, DispatchError::InvalidConfig(_)));
}

#[test]
fn run_parallel_executes_mixed_tasks() {
    let dispatcher = test_dispatcher("parallel");
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..TEST_WORKERS * 8)
        .map(|i| {
            let counter = Arc::clone(&counter);
            if i % 2 == 0 {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            } else {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            }
        })
        .collect();

    let handles = dispatcher.run_parallel(tasks).unwrap();
    assert_eq!(handles.len(), TEST_WORKERS * 8);

    assert!(wait_until(Duration::from_secs(5), || {
        counter.load(Ordering::SeqCst) == TEST_WORKERS * 8
    }));
    dispatcher.close();
}

#[tokio::test]
async fn run_async_join_handle_yields_output() {
    let dispatcher = test_dispatcher("join");

    let handle = dispatcher
        .run_async(async { thread::current().name().map(str::to_string) })
        .unwrap();

    assert_eq!(handle.await.unwrap().as_deref(), Some("join"));
}

#[test]
fn run_with_callback_runs_on_pool_thread() {
    let dispatcher = test_dispatcher("callback-thread");
    let caller = thread::current().id();
    let (tx, rx) = channel();

    dispatcher
        .run_with_callback(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                "produced"
            },
            move |value| {
                tx.send((value, thread::current().id())).unwrap();
            },
        )
        .unwrap();

    let (value, callback_thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, "produced");
    assert_ne!(callback_thread, caller);
    dispatcher.close();
}

#[test]
fn run_periodic_repeats_each_task_until_close() {
    let dispatcher = test_dispatcher("periodic");
    let counters: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let tasks: Vec<_> = counters
        .iter()
        .map(|counter| {
            let counter = Arc::clone(counter);
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .collect();

    dispatcher
        .run_periodic_with_delay(Duration::from_millis(10), tasks)
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        counters.iter().all(|c| c.load(Ordering::SeqCst) >= 3)
    }));

    dispatcher.close();
    let totals: Vec<_> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    thread::sleep(Duration::from_millis(50));
    let later: Vec<_> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(totals, later);
}

#[test]
fn run_periodic_starts_immediately() {
    let dispatcher = test_dispatcher("periodic-start");
    let (tx, rx) = channel();

    // A one-hour delay still runs the first iteration right away
    dispatcher
        .run_periodic(3600, vec![move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        }])
        .unwrap();

    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // close() must not wait out the delay
    let started = Instant::now();
    dispatcher.close();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn closed_dispatcher_rejects_work() {
    let dispatcher = test_dispatcher("rejects");
    dispatcher.close();
    dispatcher.close();

    let err = assert_err!(dispatcher.run_async(async {}));
    assert_eq!(err.to_string(), "dispatcher 'rejects' has been shut down");
    assert!(dispatcher.run_with_callback(async { 1 }, |_| {}).is_err());
    assert_eq!(dispatcher.in_flight(), 0);
}
