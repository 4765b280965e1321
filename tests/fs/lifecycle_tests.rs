use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use asyncfile::common::config::FileUtilConfig;
use asyncfile::common::exception::FileIoError;
use asyncfile::fs::{AsyncFileUtil, OperationResult};

use crate::common::tempfiles::{TestContext, payload, test_dispatcher, test_dispatcher_config};
use crate::{assert_err, assert_ok};

#[test]
fn operations_rejected_after_close() {
    let ctx = TestContext::new("closed");
    let existing = ctx.path("existing.txt");
    std::fs::write(&existing, "data").unwrap();

    ctx.util.close();
    assert!(ctx.util.is_closed());

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let err = assert_err!(ctx.util.save_async("late", ctx.path("late.txt"), move |_| {
        flag.store(true, Ordering::SeqCst);
    }));
    assert!(err.is_shutdown());

    let flag = Arc::clone(&called);
    let err = assert_err!(ctx.util.read_async(&existing, move |_| {
        flag.store(true, Ordering::SeqCst);
    }));
    assert!(err.is_shutdown());

    assert!(!called.load(Ordering::SeqCst));
    assert!(!ctx.path("late.txt").exists());
}

#[test]
fn close_lets_in_flight_writes_finish() {
    let ctx = TestContext::new("drain");
    let callbacks = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let callbacks = Arc::clone(&callbacks);
            assert_ok!(ctx.util.save_async(
                payload(1024),
                ctx.path(&format!("drain_{}.bin", i)),
                move |_| {
                    callbacks.fetch_add(1, Ordering::SeqCst);
                }
            ))
        })
        .collect();

    ctx.util.close();

    // Every callback ran exactly once and every handle saw success
    assert_eq!(callbacks.load(Ordering::SeqCst), 32);
    for handle in handles {
        assert!(handle.wait().is_success());
    }
}

#[test]
fn close_from_inside_callback() {
    let ctx = TestContext::new("close-in-callback");
    let dispatcher = Arc::clone(ctx.util.dispatcher());

    let handle = assert_ok!(ctx.util.save_async("x", ctx.path("self_close.txt"), move |_| {
        dispatcher.close();
    }));

    assert!(handle.wait().is_success());
    assert!(ctx.util.is_closed());
}

#[test]
fn facades_can_share_a_dispatcher() {
    let dispatcher = test_dispatcher("shared");
    let first = AsyncFileUtil::with_dispatcher(Arc::clone(&dispatcher), FileUtilConfig::default());
    let second = AsyncFileUtil::with_dispatcher(Arc::clone(&dispatcher), FileUtilConfig::default());
    let temp_dir = tempfile::TempDir::new().unwrap();

    let a = assert_ok!(first.save_async("a", temp_dir.path().join("a.txt"), |_| {}));
    let b = assert_ok!(second.save_async("b", temp_dir.path().join("b.txt"), |_| {}));
    assert!(a.wait().is_success());
    assert!(b.wait().is_success());

    // Each facade tracks its own operations
    assert_eq!(first.metrics().completed_operations(), 1);
    assert_eq!(second.metrics().completed_operations(), 1);

    first.close();
    assert!(second.is_closed());
}

#[cfg(unix)]
#[test]
fn shutdown_abandons_stuck_operation() {
    use std::process::Command;

    let ctx = TestContext::with_dispatcher_config(
        test_dispatcher_config("abandon").with_shutdown_timeout(Duration::from_millis(100)),
    );

    // Opening a FIFO for writing blocks until a reader shows up
    let fifo = ctx.path("stuck.fifo");
    let status = Command::new("mkfifo").arg(&fifo).status().unwrap();
    assert!(status.success());

    let (tx, rx) = std::sync::mpsc::channel();
    let handle = assert_ok!(ctx.util.save_async("never written", &fifo, move |result| {
        tx.send(result).unwrap();
    }));
    let id = handle.id();

    ctx.util.close();

    assert!(matches!(handle.wait(), OperationResult::Error(_)));
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(FileIoError::Abandoned(abandoned)) if abandoned == id));
    assert_eq!(ctx.util.metrics().abandoned_operations(), 1);

    // Release the blocked writer
    std::thread::spawn(move || {
        let _ = std::fs::File::open(fifo);
    });
}
