/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

mod common;

use tokio_util::sync::CancellationToken;

use pagevault::PageType;

#[tokio::test]
async fn replay_restores_pages_lost_between_flush_and_page_write() {
    let (manager, wal, _temp) = common::open_page_manager_with_wal("wal-replay", 10);

    let page = manager.new_page(PageType::Data).unwrap();
    let id = page.lock().unwrap().page_id();
    page.lock().unwrap().write_data(0, b"durable payload").unwrap();
    let snapshot = {
        let mut guard = page.lock().unwrap();
        guard.bump_version();
        guard.update_checksum();
        guard.to_disk_bytes()
    };

    // append-before-write: the WAL entry lands before the page is ever
    // written to the database file itself, simulating a crash in between.
    wal.append_page(id, &snapshot).unwrap();
    wal.flush_log().unwrap();

    let reread = manager.get_page(id, false).unwrap();
    assert!(reread.lock().unwrap().read_data(0, 16).unwrap().iter().all(|&b| b == 0));

    let mut applied_ids = Vec::new();
    let count = wal
        .replay(
            |page_id, payload| {
                applied_ids.push(page_id);
                manager.restore_page(page_id, &payload)
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(applied_ids, vec![id]);

    let recovered = manager.get_page(id, false).unwrap();
    let guard = recovered.lock().unwrap();
    assert_eq!(&guard.read_data(0, 16).unwrap(), b"durable payload\0");
}

#[tokio::test]
async fn replay_stops_and_truncates_at_first_corrupt_record() {
    let (manager, wal, _temp) = common::open_page_manager_with_wal("wal-replay-corrupt", 10);

    let good_page = manager.new_page(PageType::Data).unwrap();
    let good_id = good_page.lock().unwrap().page_id();
    let good_snapshot = {
        let mut guard = good_page.lock().unwrap();
        guard.write_data(0, b"ok").unwrap();
        guard.bump_version();
        guard.update_checksum();
        guard.to_disk_bytes()
    };
    wal.append_page(good_id, &good_snapshot).unwrap();

    let bad_page = manager.new_page(PageType::Data).unwrap();
    let bad_id = bad_page.lock().unwrap().page_id();
    let mut bad_snapshot = {
        let mut guard = bad_page.lock().unwrap();
        guard.write_data(0, b"corrupt").unwrap();
        guard.bump_version();
        guard.update_checksum();
        guard.to_disk_bytes()
    };
    bad_snapshot[0] ^= 0xFF; // flip a byte so its checksum no longer matches
    wal.append_page(bad_id, &bad_snapshot).unwrap();
    wal.flush_log().unwrap();

    let mut applied_ids = Vec::new();
    let count = wal
        .replay(
            |page_id, payload| {
                applied_ids.push(page_id);
                manager.restore_page(page_id, &payload)
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(applied_ids, vec![good_id]);
    assert!(!wal.has_pending_entries());
}
