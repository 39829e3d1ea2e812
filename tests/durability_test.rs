/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pagevault::test_utils::TempDbPath;
use pagevault::{DiskStream, DurabilityBackend, FlushScheduler, PageManager, PageType, WriteAheadLog, WriteConcern};

/// Simulates a crash: dirty pages and a flushed-but-unapplied WAL are left
/// on disk without ever reaching `WriteConcern::Synced`. A fresh set of
/// components reopens the same files and replays the WAL to recover.
#[tokio::test]
async fn journaled_writes_survive_a_simulated_crash() {
    let temp = TempDbPath::new("durability", "crash-recovery");

    let page_id = {
        let disk_stream = Arc::new(DiskStream::open(temp.path()).unwrap());
        let manager = Arc::new(PageManager::new(Arc::clone(&disk_stream), common::PAGE_SIZE, 10).unwrap());
        let wal = Arc::new(WriteAheadLog::open(temp.path(), common::PAGE_SIZE, true).unwrap());
        let scheduler = FlushScheduler::new(Arc::clone(&manager), Arc::clone(&wal), Duration::from_secs(3600));

        let page = manager.new_page(PageType::Data).unwrap();
        let id = page.lock().unwrap().page_id();
        page.lock().unwrap().write_data(0, b"recovered after crash").unwrap();
        let snapshot = {
            let mut guard = page.lock().unwrap();
            guard.bump_version();
            guard.update_checksum();
            guard.to_disk_bytes()
        };

        // append-before-write, then only journal durability, never Synced:
        // the page itself never reaches the database file in this run.
        wal.append_page(id, &snapshot).unwrap();
        scheduler
            .ensure_durability_async(WriteConcern::Journaled, CancellationToken::new())
            .await
            .unwrap();

        let on_disk = manager.get_page(id, false).unwrap();
        assert!(on_disk.lock().unwrap().read_data(0, 4).unwrap().iter().all(|&b| b == 0));

        scheduler.dispose();
        id
    };

    // "Restart": fresh components over the same files, no in-memory state
    // carried across.
    let disk_stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    let manager = Arc::new(PageManager::new(disk_stream, common::PAGE_SIZE, 10).unwrap());
    let wal = Arc::new(WriteAheadLog::open(temp.path(), common::PAGE_SIZE, true).unwrap());

    let applied = wal
        .replay(
            |id, payload| manager.restore_page(id, &payload),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(applied, 1);

    let recovered = manager.get_page(page_id, false).unwrap();
    let guard = recovered.lock().unwrap();
    assert_eq!(&guard.read_data(0, 21).unwrap(), b"recovered after crash");
}

/// Matches the literal crash scenario: the page is saved to disk *and*
/// journaled before the simulated crash. Replay on reopen must reproduce
/// exactly what the last `save_page` wrote, not something stale or doubled.
#[tokio::test]
async fn replay_after_a_completed_save_page_reproduces_the_same_bytes() {
    let temp = TempDbPath::new("durability", "save-then-journal");

    let page_id = {
        let disk_stream = Arc::new(DiskStream::open(temp.path()).unwrap());
        let manager = Arc::new(PageManager::new(Arc::clone(&disk_stream), common::PAGE_SIZE, 10).unwrap());
        let wal = Arc::new(WriteAheadLog::open(temp.path(), common::PAGE_SIZE, true).unwrap());
        let scheduler = FlushScheduler::new(Arc::clone(&manager), Arc::clone(&wal), Duration::from_secs(3600));

        let page = manager.new_page(PageType::Data).unwrap();
        let id = page.lock().unwrap().page_id();
        page.lock().unwrap().write_data(0, b"saved before crash").unwrap();
        let snapshot = {
            let mut guard = page.lock().unwrap();
            guard.bump_version();
            guard.update_checksum();
            guard.to_disk_bytes()
        };

        wal.append_page(id, &snapshot).unwrap();
        manager.save_page(&page).unwrap();
        scheduler
            .ensure_durability_async(WriteConcern::Journaled, CancellationToken::new())
            .await
            .unwrap();

        scheduler.dispose();
        id
    };

    let disk_stream = Arc::new(DiskStream::open(temp.path()).unwrap());
    let manager = Arc::new(PageManager::new(disk_stream, common::PAGE_SIZE, 10).unwrap());
    let wal = Arc::new(WriteAheadLog::open(temp.path(), common::PAGE_SIZE, true).unwrap());

    wal.replay(
        |id, payload| manager.restore_page(id, &payload),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let recovered = manager.get_page(page_id, false).unwrap();
    let guard = recovered.lock().unwrap();
    assert_eq!(&guard.read_data(0, 18).unwrap(), b"saved before crash");
}
