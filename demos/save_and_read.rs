//! Saves a greeting asynchronously, reads it back through a callback and
//! again synchronously, then shuts the pool down.
//!
//! Run with `cargo run --example save_and_read [path]`.

use std::path::PathBuf;
use std::sync::mpsc;

use asyncfile::common::logger::initialize_logger;
use asyncfile::{AsyncFileUtil, FileIoError, FileUtilConfig};

fn main() -> Result<(), FileIoError> {
    initialize_logger();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("asyncfile_demo.txt"));
    let greeting = "Hello world!";

    let util = AsyncFileUtil::new(FileUtilConfig::default())?;

    let expected = greeting.len();
    let handle = util.save_async(greeting, &path, move |result| match result {
        Ok(written) if written == expected => println!("File was successfully saved!"),
        Ok(written) => println!("Short write: {} of {} bytes", written, expected),
        Err(e) => println!("Save failed: {}", e),
    })?;
    handle.wait();

    let (tx, rx) = mpsc::channel();
    let handle = util.read_async(&path, move |result| {
        let _ = tx.send(result);
    })?;
    handle.wait();

    if let Ok(Ok(outcome)) = rx.recv() {
        println!(
            "Read {} bytes: {}",
            outcome.bytes_read,
            String::from_utf8_lossy(outcome.bytes())
        );
    }

    let text = AsyncFileUtil::read_sync(&path, encoding_rs::UTF_8)?;
    println!("Synchronous read: {}", text);

    util.close();
    Ok(())
}
