mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pagevault::DiskStream;
use pagevault::test_utils::TempDbPath;

#[test]
fn overlapping_region_locks_serialize_concurrent_writers() {
    let temp = TempDbPath::new("region-lock", "serialize");
    let stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    stream.set_length(4096).unwrap();

    let first = stream.lock_region(0, 100).unwrap();

    let worker_stream = Arc::clone(&stream);
    let worker = thread::spawn(move || {
        let handle = worker_stream.lock_region(50, 50).unwrap();
        worker_stream.write_page(50, &[0xAB; 10]).unwrap();
        worker_stream.unlock_region(handle).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!worker.is_finished());

    stream.write_page(0, &[0x01; 10]).unwrap();
    stream.unlock_region(first).unwrap();
    worker.join().unwrap();

    let written = stream.read_page(50, 10).unwrap();
    assert_eq!(written, vec![0xAB; 10]);
}

#[test]
fn non_overlapping_regions_run_concurrently() {
    let temp = TempDbPath::new("region-lock", "concurrent");
    let stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    stream.set_length(4096).unwrap();

    let a = stream.lock_region(0, 100).unwrap();
    let worker_stream = Arc::clone(&stream);
    let worker = thread::spawn(move || {
        let handle = worker_stream.lock_region(200, 100).unwrap();
        worker_stream.unlock_region(handle).unwrap();
    });

    worker.join().unwrap();
    stream.unlock_region(a).unwrap();
}

#[test]
fn adjacent_half_open_ranges_do_not_block_each_other() {
    let temp = TempDbPath::new("region-lock", "adjacent");
    let stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    stream.set_length(4096).unwrap();

    // [0, 100) and [100, 200) touch at the boundary but don't overlap.
    let a = stream.lock_region(0, 100).unwrap();
    let worker_stream = Arc::clone(&stream);
    let worker = thread::spawn(move || {
        let handle = worker_stream.lock_region(100, 100).unwrap();
        worker_stream.unlock_region(handle).unwrap();
    });

    worker.join().unwrap();
    stream.unlock_region(a).unwrap();
}
