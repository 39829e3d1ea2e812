/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::path::Path;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::disk_stream::DiskStream;
use crate::error::StorageResult;
use crate::flush_scheduler::{DurabilityBackend, FlushScheduler, WriteConcern};
use crate::large_document::LargeDocumentStorage;
use crate::page_manager::PageManager;
use crate::wal::WriteAheadLog;

/// Top-level assembly of the storage core: opens the database file, replays
/// its WAL, and wires the buffer pool, journal, flush scheduler, and
/// large-document store together from a single [`Config`].
///
/// This is the one constructor callers are expected to use; the individual
/// components remain independently constructible (and independently tested)
/// for embedders that want to assemble a non-default pipeline.
pub struct StorageEngine {
    page_manager: Arc<PageManager>,
    wal: Arc<WriteAheadLog>,
    flush_scheduler: FlushScheduler,
    large_documents: LargeDocumentStorage,
    config: Config,
}

impl StorageEngine {
    /// Opens (creating if absent) the database file at `path`, replays any
    /// WAL entries left over from a prior crash, and starts the background
    /// flush loop.
    pub async fn open(path: impl AsRef<Path>, config: Config) -> StorageResult<StorageEngine> {
        let path = path.as_ref();
        let disk_stream = Arc::new(DiskStream::open(path)?);
        let page_manager = Arc::new(PageManager::new(
            Arc::clone(&disk_stream),
            config.page_size,
            config.max_cache_size,
        )?);
        let wal = Arc::new(WriteAheadLog::open(path, config.page_size, config.wal_enabled)?);

        let applied = wal
            .replay(
                |page_id, payload| page_manager.restore_page(page_id, &payload),
                CancellationToken::new(),
            )
            .await?;
        if applied > 0 {
            info!("replayed {} WAL record(s) on open", applied);
        }

        let flush_scheduler = FlushScheduler::new(Arc::clone(&page_manager), Arc::clone(&wal), config.flush_interval);
        let large_documents = LargeDocumentStorage::new(Arc::clone(&page_manager), config.page_size);

        Ok(StorageEngine {
            page_manager,
            wal,
            flush_scheduler,
            large_documents,
            config,
        })
    }

    pub fn page_manager(&self) -> &Arc<PageManager> {
        &self.page_manager
    }

    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    pub fn large_documents(&self) -> &LargeDocumentStorage {
        &self.large_documents
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Awaits the requested durability level.
    pub async fn ensure_durability(&self, concern: WriteConcern, cancel: CancellationToken) -> StorageResult<()> {
        self.flush_scheduler.ensure_durability_async(concern, cancel).await
    }

    /// Awaits `config.default_write_concern`.
    pub async fn ensure_default_durability(&self, cancel: CancellationToken) -> StorageResult<()> {
        self.flush_scheduler
            .ensure_durability_async(self.config.default_write_concern, cancel)
            .await
    }

    /// Stops the background flush loop. Idempotent; also runs on `Drop`.
    pub fn close(&self) {
        self.flush_scheduler.dispose();
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;
    use crate::test_utils::TempDbPath;

    #[tokio::test]
    async fn open_assembles_a_usable_engine() {
        let temp = TempDbPath::new("engine", "open");
        let engine = StorageEngine::open(temp.path(), Config::default()).await.unwrap();

        let page = engine.page_manager().new_page(PageType::Data).unwrap();
        let id = page.lock().unwrap().page_id();
        page.lock().unwrap().write_data(0, b"hello").unwrap();
        engine.page_manager().save_page(&page).unwrap();

        let reread = engine.page_manager().get_page(id, true).unwrap();
        assert_eq!(&reread.lock().unwrap().read_data(0, 5).unwrap(), b"hello");

        engine
            .ensure_durability(WriteConcern::None, CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_replays_a_pending_wal_from_a_prior_run() {
        let temp = TempDbPath::new("engine", "replay-on-open");

        let page_id = {
            let engine = StorageEngine::open(temp.path(), Config::default()).await.unwrap();
            let page = engine.page_manager().new_page(PageType::Data).unwrap();
            let id = page.lock().unwrap().page_id();
            page.lock().unwrap().write_data(0, b"from wal").unwrap();
            let snapshot = {
                let mut guard = page.lock().unwrap();
                guard.bump_version();
                guard.update_checksum();
                guard.to_disk_bytes()
            };
            engine.wal().append_page(id, &snapshot).unwrap();
            engine
                .ensure_durability(WriteConcern::Journaled, CancellationToken::new())
                .await
                .unwrap();
            id
        };

        let engine = StorageEngine::open(temp.path(), Config::default()).await.unwrap();
        let page = engine.page_manager().get_page(page_id, false).unwrap();
        assert_eq!(&page.lock().unwrap().read_data(0, 8).unwrap(), b"from wal");
    }
}
