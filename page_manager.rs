/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::disk_stream::DiskStream;
use crate::error::{StorageError, StorageResult};
use crate::page::{Page, PageHeader, PageType, TickSource, HEADER_SIZE};
use crate::pagecache::PageCache;

#[derive(Debug, Clone)]
pub struct PageManagerStatistics {
    pub total_pages: u64,
    pub cached_pages: usize,
    pub free_pages: usize,
    pub max_cache_size: i64,
    pub first_free_page_id: u32,
}

impl std::fmt::Display for PageManagerStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PageManager[cached={}/{}, free={}, total={}]",
            self.cached_pages, self.max_cache_size, self.free_pages, self.total_pages
        )
    }
}

/// The buffer pool: an LRU cache of pages backed by a `DiskStream`, with a
/// free-page list for allocation reuse.
pub struct PageManager {
    disk_stream: Arc<DiskStream>,
    page_size: u32,
    cache: Mutex<PageCache>,
    free_list: Mutex<VecDeque<u32>>,
    tick_source: TickSource,
}

impl PageManager {
    pub fn new(disk_stream: Arc<DiskStream>, page_size: u32, max_cache_size: i64) -> StorageResult<PageManager> {
        if max_cache_size < 0 {
            return Err(StorageError::out_of_range("max_cache_size must not be negative"));
        }
        if page_size == 0 {
            return Err(StorageError::invalid_argument("page_size must not be zero"));
        }

        let manager = PageManager {
            disk_stream,
            page_size,
            cache: Mutex::new(PageCache::new(max_cache_size)),
            free_list: Mutex::new(VecDeque::new()),
            tick_source: TickSource::new(),
        };
        manager.scan_free_list()?;
        Ok(manager)
    }

    fn scan_free_list(&self) -> StorageResult<()> {
        let file_size = self.disk_stream.get_statistics()?.size;
        let total_pages = file_size / self.page_size as u64;
        let mut free_list = self.free_list.lock().unwrap();
        for page_id in 1..total_pages {
            let page_id = page_id as u32;
            let offset = page_id as u64 * self.page_size as u64;
            let header_bytes = match self.disk_stream.read_page(offset, HEADER_SIZE) {
                Ok(bytes) => bytes,
                Err(_) => continue, // scan errors on individual pages are swallowed
            };
            match PageHeader::decode(&header_bytes) {
                Ok(header) if header.page_type == PageType::Empty && header.page_id == page_id => {
                    free_list.push_back(page_id);
                }
                _ => {}
            }
        }
        debug!("seeded free list with {} page(s)", free_list.len());
        Ok(())
    }

    fn materialize_page(&self, page_id: u32, raw: &[u8]) -> Page {
        match Page::from_bytes(page_id, raw, self.page_size, self.tick_source.clone()) {
            Ok(page) if page.verify_integrity() => page,
            Ok(_) => {
                warn!("page {} failed checksum verification, substituting empty page", page_id);
                self.empty_placeholder(page_id)
            }
            Err(_) => {
                warn!("page {} failed to parse, substituting empty page", page_id);
                self.empty_placeholder(page_id)
            }
        }
    }

    fn empty_placeholder(&self, page_id: u32) -> Page {
        Page::new(page_id, self.page_size, PageType::Empty, self.tick_source.clone())
            .expect("page_size already validated at construction")
    }

    /// Returns the cached or disk-loaded page. A cache hit returns the same
    /// `Arc` a prior caller may still hold. A corrupt on-disk page is
    /// silently replaced with a fresh empty page rather than erroring.
    pub fn get_page(&self, page_id: u32, use_cache: bool) -> StorageResult<Arc<Mutex<Page>>> {
        if page_id == 0 {
            return Err(StorageError::invalid_argument("page id must be nonzero"));
        }
        if use_cache {
            if let Some(page) = self.cache.lock().unwrap().get(page_id) {
                return Ok(page);
            }
        }
        let offset = page_id as u64 * self.page_size as u64;
        let raw = self.disk_stream.read_page(offset, self.page_size as usize)?;
        let page = self.materialize_page(page_id, &raw);
        let arc = Arc::new(Mutex::new(page));
        self.cache.lock().unwrap().insert(page_id, Arc::clone(&arc));
        Ok(arc)
    }

    pub async fn get_page_async(
        &self,
        page_id: u32,
        use_cache: bool,
        cancel: CancellationToken,
    ) -> StorageResult<Arc<Mutex<Page>>> {
        if page_id == 0 {
            return Err(StorageError::invalid_argument("page id must be nonzero"));
        }
        if use_cache {
            if let Some(page) = self.cache.lock().unwrap().get(page_id) {
                return Ok(page);
            }
        }
        let offset = page_id as u64 * self.page_size as u64;
        let raw = self
            .disk_stream
            .read_page_async(offset, self.page_size as usize, cancel)
            .await?;
        let page = self.materialize_page(page_id, &raw);
        let arc = Arc::new(Mutex::new(page));
        self.cache.lock().unwrap().insert(page_id, Arc::clone(&arc));
        Ok(arc)
    }

    /// Persists `page` to disk: bumps version, recomputes the checksum,
    /// writes the full page image, marks clean. Does **not** append to the
    /// WAL — callers append before calling `save_page` so that crash
    /// recovery can rely on append-before-write ordering.
    pub fn save_page(&self, page: &Arc<Mutex<Page>>) -> StorageResult<()> {
        let (page_id, bytes) = {
            let mut guard = page.lock().unwrap();
            if guard.is_disposed() {
                return Ok(());
            }
            guard.bump_version();
            guard.update_checksum();
            let bytes = guard.to_disk_bytes();
            guard.mark_clean();
            (guard.page_id(), bytes)
        };
        let offset = page_id as u64 * self.page_size as u64;
        self.disk_stream.write_page(offset, &bytes)?;
        self.cache.lock().unwrap().insert(page_id, Arc::clone(page));
        Ok(())
    }

    pub async fn save_page_async(&self, page: &Arc<Mutex<Page>>, cancel: CancellationToken) -> StorageResult<()> {
        let (page_id, bytes) = {
            let mut guard = page.lock().unwrap();
            if guard.is_disposed() {
                return Ok(());
            }
            guard.bump_version();
            guard.update_checksum();
            let bytes = guard.to_disk_bytes();
            guard.mark_clean();
            (guard.page_id(), bytes)
        };
        let offset = page_id as u64 * self.page_size as u64;
        self.disk_stream.write_page_async(offset, bytes, cancel).await?;
        self.cache.lock().unwrap().insert(page_id, Arc::clone(page));
        Ok(())
    }

    /// Allocates a fresh page: reuses a free-list id if one is available,
    /// otherwise extends the file by one page.
    pub fn new_page(&self, page_type: PageType) -> StorageResult<Arc<Mutex<Page>>> {
        let page_id = match self.free_list.lock().unwrap().pop_front() {
            Some(id) => id,
            None => self.allocate_new_page_id()?,
        };
        let mut page = Page::new(page_id, self.page_size, page_type, self.tick_source.clone())?;
        page.mark_dirty();
        let arc = Arc::new(Mutex::new(page));
        self.cache.lock().unwrap().insert(page_id, Arc::clone(&arc));
        Ok(arc)
    }

    fn allocate_new_page_id(&self) -> StorageResult<u32> {
        let stats = self.disk_stream.get_statistics()?;
        let current_pages = stats.size / self.page_size as u64;
        let new_id = current_pages.max(1) as u32;
        self.disk_stream
            .set_length((new_id as u64 + 1) * self.page_size as u64)?;
        Ok(new_id)
    }

    /// Writes an Empty-typed header to disk, evicts the page from cache, and
    /// pushes it onto the free list. Idempotent: freeing an already-Empty
    /// page succeeds and leaves the free list containing the id.
    pub fn free_page(&self, page_id: u32) -> StorageResult<()> {
        if page_id == 0 {
            return Err(StorageError::invalid_argument("page id must be nonzero"));
        }
        let mut empty = Page::new(page_id, self.page_size, PageType::Empty, self.tick_source.clone())?;
        empty.update_checksum();
        let bytes = empty.to_disk_bytes();
        let offset = page_id as u64 * self.page_size as u64;
        self.disk_stream.write_page(offset, &bytes)?;
        self.cache.lock().unwrap().remove(page_id);
        self.free_list.lock().unwrap().push_back(page_id);
        Ok(())
    }

    /// Internal recovery entry point used by WAL replay: writes raw bytes
    /// directly to disk and invalidates any cached copy so the next
    /// `get_page` re-reads from disk.
    pub fn restore_page(&self, page_id: u32, raw_bytes: &[u8]) -> StorageResult<()> {
        if page_id == 0 {
            return Err(StorageError::invalid_argument("page id must be nonzero"));
        }
        if raw_bytes.len() > self.page_size as usize {
            return Err(StorageError::invalid_argument(format!(
                "restore payload of {} bytes exceeds page_size {}",
                raw_bytes.len(),
                self.page_size
            )));
        }
        let mut buf = vec![0u8; self.page_size as usize];
        buf[..raw_bytes.len()].copy_from_slice(raw_bytes);
        let offset = page_id as u64 * self.page_size as u64;
        self.disk_stream.write_page(offset, &buf)?;
        self.cache.lock().unwrap().remove(page_id);
        Ok(())
    }

    /// Evicts LRU entries until the cache holds at most `keep` pages.
    pub fn clear_cache(&self, keep: usize) {
        self.cache.lock().unwrap().clear_to(keep);
    }

    /// Writes every dirty cached page back to disk. Pages that turn out to
    /// be disposed mid-scan are tolerated (save_page treats them as a no-op).
    pub async fn flush_dirty_pages_async(&self, cancel: CancellationToken) -> StorageResult<()> {
        let dirty = self.cache.lock().unwrap().dirty_entries();
        for (_, page) in dirty {
            self.save_page_async(&page, cancel.clone()).await?;
        }
        Ok(())
    }

    pub fn get_statistics(&self) -> StorageResult<PageManagerStatistics> {
        let total_pages = self.disk_stream.get_statistics()?.size / self.page_size as u64;
        let cache = self.cache.lock().unwrap();
        let free_list = self.free_list.lock().unwrap();
        Ok(PageManagerStatistics {
            total_pages,
            cached_pages: cache.len(),
            free_pages: free_list.len(),
            max_cache_size: cache.max_size(),
            first_free_page_id: free_list.front().copied().unwrap_or(0),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn disk_stream(&self) -> &Arc<DiskStream> {
        &self.disk_stream
    }
}
