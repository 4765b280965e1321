use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asyncfile::common::config::FileUtilConfig;
use asyncfile::common::exception::FileIoError;
use asyncfile::fs::{AsyncFileUtil, OperationResult, ReadCallback, ReadOutcome, WriteCallback};

use crate::assert_ok;
use crate::common::tempfiles::{TestContext, payload, test_dispatcher};

type Collected<T> = Arc<Mutex<HashMap<PathBuf, Result<T, FileIoError>>>>;

fn write_callback(path: PathBuf, collected: &Collected<usize>) -> WriteCallback {
    let collected = Arc::clone(collected);
    Box::new(move |result| {
        collected.lock().unwrap().insert(path, result);
    })
}

fn read_callback(path: PathBuf, collected: &Collected<ReadOutcome>) -> ReadCallback {
    let collected = Arc::clone(collected);
    Box::new(move |result| {
        collected.lock().unwrap().insert(path, result);
    })
}

#[tokio::test]
async fn save_batch_writes_every_entry() {
    let ctx = TestContext::new("batch-write");
    let collected: Collected<usize> = Arc::default();

    let mut entries = HashMap::new();
    for i in 0..6 {
        let path = ctx.path(&format!("batch_{}.bin", i));
        let data = payload(100 * (i + 1));
        entries.insert(path.clone(), (data, write_callback(path, &collected)));
    }

    let report = assert_ok!(ctx.util.save_batch_async(entries)).await;
    assert_eq!(report.len(), 6);
    assert_eq!(report.succeeded(), 6);

    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 6);
    for i in 0..6 {
        let path = ctx.path(&format!("batch_{}.bin", i));
        let expected = payload(100 * (i + 1));
        assert_eq!(*collected[&path].as_ref().unwrap(), expected.len());
        assert_eq!(std::fs::read(&path).unwrap(), expected);
        assert_eq!(
            report.get(&path),
            Some(&OperationResult::Success {
                bytes: expected.len()
            })
        );
    }
}

#[tokio::test]
async fn save_batch_isolates_failing_entry() {
    let ctx = TestContext::new("batch-write-failure");
    let collected: Collected<usize> = Arc::default();

    let good = ctx.path("good.txt");
    let bad = ctx.dir();

    let mut entries = HashMap::new();
    entries.insert(
        good.clone(),
        (b"ok".to_vec(), write_callback(good.clone(), &collected)),
    );
    entries.insert(
        bad.clone(),
        (b"nope".to_vec(), write_callback(bad.clone(), &collected)),
    );

    let report = assert_ok!(ctx.util.save_batch_async(entries)).await;
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let collected = collected.lock().unwrap();
    assert_eq!(*collected[&good].as_ref().unwrap(), 2);
    assert!(collected[&bad].is_err());
}

#[tokio::test]
async fn read_batch_reports_missing_entry_to_its_callback() {
    let ctx = TestContext::new("batch-read");
    let collected: Collected<ReadOutcome> = Arc::default();

    let first = ctx.path("first.txt");
    let second = ctx.path("second.txt");
    let missing = ctx.path("missing.txt");
    std::fs::write(&first, "first body").unwrap();
    std::fs::write(&second, "second").unwrap();

    let entries: HashMap<PathBuf, ReadCallback> = [&first, &second, &missing]
        .into_iter()
        .map(|path| (path.clone(), read_callback(path.clone(), &collected)))
        .collect();

    let report = assert_ok!(ctx.util.read_batch_async(entries)).await;
    assert_eq!(report.len(), 3);
    assert_eq!(report.failed(), 1);
    assert!(matches!(report.get(&missing), Some(OperationResult::Error(_))));

    let collected = collected.lock().unwrap();
    assert_eq!(collected[&first].as_ref().unwrap().bytes(), b"first body");
    assert_eq!(collected[&second].as_ref().unwrap().bytes(), b"second");
    assert!(matches!(
        collected[&missing],
        Err(FileIoError::NotFound(ref path)) if path == &missing
    ));
}

#[tokio::test]
async fn empty_batches_resolve_immediately() {
    let ctx = TestContext::new("batch-empty");

    let report = assert_ok!(ctx.util.save_batch_async(HashMap::new())).await;
    assert!(report.is_empty());

    let report = assert_ok!(ctx.util.read_batch_async(HashMap::new())).await;
    assert!(report.is_empty());
}

#[test]
fn batch_handle_blocking_wait() {
    let ctx = TestContext::new("batch-blocking");
    let collected: Collected<usize> = Arc::default();

    let path = ctx.path("blocking.bin");
    let mut entries = HashMap::new();
    entries.insert(path.clone(), (payload(10), write_callback(path.clone(), &collected)));

    let report = assert_ok!(ctx.util.save_batch_async(entries)).wait();
    assert_eq!(report.get(&path), Some(&OperationResult::Success { bytes: 10 }));
    assert_eq!(collected.lock().unwrap().len(), 1);
}

#[test]
fn batch_wait_inside_callback() {
    let dispatcher = test_dispatcher("batch-chained");
    let util = Arc::new(AsyncFileUtil::with_dispatcher(dispatcher, FileUtilConfig::default()));
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("chained.bin");
    let collected: Collected<ReadOutcome> = Arc::default();

    let (tx, rx) = std::sync::mpsc::channel();
    let chained = Arc::clone(&util);
    let read_path = path.clone();
    let read_collected = Arc::clone(&collected);
    let handle = assert_ok!(util.save_async(payload(64), &path, move |_| {
        let mut entries: HashMap<PathBuf, ReadCallback> = HashMap::new();
        entries.insert(read_path.clone(), read_callback(read_path, &read_collected));
        let report = chained.read_batch_async(entries).unwrap().wait();
        tx.send(report).unwrap();
    }));

    assert!(handle.wait().is_success());
    let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(report.get(&path), Some(&OperationResult::Success { bytes: 64 }));
    assert_eq!(collected.lock().unwrap()[&path].as_ref().unwrap().bytes(), &payload(64)[..]);
    assert_eq!(util.metrics().callback_failures(), 0);

    util.close();
}
