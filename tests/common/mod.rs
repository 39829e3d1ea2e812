use std::sync::Arc;

use pagevault::test_utils::TempDbPath;
use pagevault::{DiskStream, PageManager, WriteAheadLog};

#[allow(dead_code)]
pub const PAGE_SIZE: u32 = 4096;

/// Opens a fresh `PageManager` backed by a unique temp file for `name`. The
/// returned `TempDbPath` must be kept alive for the duration of the test; it
/// removes the backing file(s) on drop.
#[allow(dead_code)]
pub fn open_page_manager(name: &str, max_cache_size: i64) -> (Arc<PageManager>, TempDbPath) {
    let temp = TempDbPath::new("integration", name);
    let disk_stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    let manager = Arc::new(PageManager::new(disk_stream, PAGE_SIZE, max_cache_size).unwrap());
    (manager, temp)
}

/// Opens a `PageManager` plus an enabled `WriteAheadLog` sharing the same
/// backing path.
#[allow(dead_code)]
pub fn open_page_manager_with_wal(name: &str, max_cache_size: i64) -> (Arc<PageManager>, Arc<WriteAheadLog>, TempDbPath) {
    let (manager, temp) = open_page_manager(name, max_cache_size);
    let wal = Arc::new(WriteAheadLog::open(temp.path(), PAGE_SIZE, true).unwrap());
    (manager, wal, temp)
}
