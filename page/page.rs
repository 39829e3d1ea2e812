/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::error::{StorageError, StorageResult};
use crate::page::header::{PageHeader, PageType, HEADER_SIZE};
use crate::page::tick::TickSource;

/// An in-memory page: a fixed header plus a payload region, with pin and
/// dirty tracking for the buffer pool.
#[derive(Debug, Clone)]
pub struct Page {
    header: PageHeader,
    payload: Vec<u8>,
    page_size: u32,
    dirty: bool,
    pin_count: u32,
    disposed: bool,
    tick_source: TickSource,
}

impl Page {
    /// Creates a fresh, clean page of the given type. `page_size` must be at
    /// least large enough to hold the header.
    pub fn new(
        page_id: u32,
        page_size: u32,
        page_type: PageType,
        tick_source: TickSource,
    ) -> StorageResult<Page> {
        if (page_size as usize) < HEADER_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "page_size {} is smaller than header size {}",
                page_size, HEADER_SIZE
            )));
        }
        let payload_len = page_size as usize - HEADER_SIZE;
        let tick = tick_source.tick();
        Ok(Page {
            header: PageHeader::new(page_id, page_type, payload_len as u16, tick),
            payload: vec![0u8; payload_len],
            page_size,
            dirty: false,
            pin_count: 0,
            disposed: false,
            tick_source,
        })
    }

    /// Parses a page from a raw `page_size`-byte (or larger) on-disk image.
    /// Fails if the stored page id does not match `page_id`.
    pub fn from_bytes(
        page_id: u32,
        raw: &[u8],
        page_size: u32,
        tick_source: TickSource,
    ) -> StorageResult<Page> {
        if (page_size as usize) < HEADER_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "page_size {} is smaller than header size {}",
                page_size, HEADER_SIZE
            )));
        }
        if raw.len() < HEADER_SIZE {
            return Err(StorageError::invalid_argument(
                "raw page buffer smaller than header size",
            ));
        }
        let header = PageHeader::decode(raw)?;
        if header.page_id != page_id {
            return Err(StorageError::invalid_argument(format!(
                "page id mismatch: expected {}, stored {}",
                page_id, header.page_id
            )));
        }
        let payload_len = page_size as usize - HEADER_SIZE;
        let mut payload = vec![0u8; payload_len];
        let available = raw.len() - HEADER_SIZE;
        let copy_len = available.min(payload_len);
        payload[..copy_len].copy_from_slice(&raw[HEADER_SIZE..HEADER_SIZE + copy_len]);
        Ok(Page {
            header,
            payload,
            page_size,
            dirty: false,
            pin_count: 0,
            disposed: false,
            tick_source,
        })
    }

    fn ensure_not_disposed(&self) -> StorageResult<()> {
        if self.disposed {
            return Err(StorageError::disposed("page is disposed"));
        }
        Ok(())
    }

    pub fn page_id(&self) -> u32 {
        self.header.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    fn touch(&mut self) {
        self.header.modified_at = self.tick_source.tick();
        self.dirty = true;
    }

    /// Reads `length` bytes starting at `offset`, clamped to the payload
    /// bounds. Out-of-range reads return an empty slice rather than an error.
    pub fn read_data(&self, offset: usize, length: usize) -> StorageResult<Vec<u8>> {
        self.ensure_not_disposed()?;
        if offset >= self.payload.len() {
            return Ok(Vec::new());
        }
        let end = (offset + length).min(self.payload.len());
        Ok(self.payload[offset..end].to_vec())
    }

    /// Strict form of `read_data`: any out-of-range span fails with
    /// `OutOfRange` instead of clamping.
    pub fn get_data_span(&self, offset: usize, length: usize) -> StorageResult<Vec<u8>> {
        self.ensure_not_disposed()?;
        let end = offset
            .checked_add(length)
            .ok_or_else(|| StorageError::out_of_range("offset + length overflows"))?;
        if end > self.payload.len() {
            return Err(StorageError::out_of_range(format!(
                "span [{}, {}) exceeds payload length {}",
                offset,
                end,
                self.payload.len()
            )));
        }
        Ok(self.payload[offset..end].to_vec())
    }

    pub fn write_data(&mut self, offset: usize, bytes: &[u8]) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| StorageError::out_of_range("offset + length overflows"))?;
        if end > self.payload.len() {
            return Err(StorageError::out_of_range(format!(
                "write span [{}, {}) exceeds payload length {}",
                offset,
                end,
                self.payload.len()
            )));
        }
        self.payload[offset..end].copy_from_slice(bytes);
        self.touch();
        Ok(())
    }

    /// Zeroes the payload, bumps the version, marks the page type `Empty`
    /// and clears link fields.
    pub fn clear_data(&mut self) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        for b in self.payload.iter_mut() {
            *b = 0;
        }
        self.header.page_type = PageType::Empty;
        self.header.prev_page_id = 0;
        self.header.next_page_id = 0;
        self.header.free_bytes = self.payload.len() as u16;
        self.header.item_count = 0;
        self.header.version = self.header.version.wrapping_add(1);
        self.touch();
        Ok(())
    }

    pub fn update_page_type(&mut self, page_type: PageType) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.header.page_type = page_type;
        self.touch();
        Ok(())
    }

    pub fn set_links(&mut self, prev: u32, next: u32) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.header.prev_page_id = prev;
        self.header.next_page_id = next;
        self.touch();
        Ok(())
    }

    pub fn update_stats(&mut self, free_bytes: u16, item_count: u16) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.header.free_bytes = free_bytes;
        self.header.item_count = item_count;
        self.touch();
        Ok(())
    }

    pub fn prev_page_id(&self) -> u32 {
        self.header.prev_page_id
    }

    pub fn next_page_id(&self) -> u32 {
        self.header.next_page_id
    }

    /// Recomputes the CRC-32 over the payload and stores it in the header.
    pub fn update_checksum(&mut self) {
        self.header.checksum = crc32fast::hash(&self.payload);
    }

    /// Recomputes the CRC-32 over the payload and compares against the
    /// stored checksum.
    pub fn verify_integrity(&self) -> bool {
        crc32fast::hash(&self.payload) == self.header.checksum
    }

    /// Bumps the version counter. Callers (the buffer pool's `save_page`)
    /// call this once per commit, before `update_checksum`.
    pub fn bump_version(&mut self) {
        self.header.version = self.header.version.wrapping_add(1);
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        self.pin_count = self.pin_count.saturating_sub(1);
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Serializes header + payload into a full `page_size`-byte on-disk
    /// image.
    pub fn to_disk_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.header.encode(&mut buf[..HEADER_SIZE]);
        buf[HEADER_SIZE..HEADER_SIZE + self.payload.len()].copy_from_slice(&self.payload);
        buf
    }

    /// Returns a byte image of the page: the full `page_size` when
    /// `include_all` is set, otherwise the header plus the "used" prefix of
    /// the payload as implied by `free_bytes` (never exceeds `page_size`).
    pub fn snapshot(&self, include_all: bool) -> Vec<u8> {
        if include_all {
            return self.to_disk_bytes();
        }
        let used = self
            .payload
            .len()
            .saturating_sub(self.header.free_bytes as usize)
            .min(self.payload.len());
        let mut buf = vec![0u8; HEADER_SIZE + used];
        self.header.encode(&mut buf[..HEADER_SIZE]);
        buf[HEADER_SIZE..].copy_from_slice(&self.payload[..used]);
        buf
    }

    /// Produces a detached, deeply-copied page with `pin_count = 0` and
    /// `dirty = false`.
    pub fn deep_clone(&self) -> Page {
        let mut cloned = self.clone();
        cloned.pin_count = 0;
        cloned.dirty = false;
        cloned
    }
}
