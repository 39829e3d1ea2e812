/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{StorageError, StorageResult};
use crate::page::{PageType, HEADER_SIZE};
use crate::page_manager::PageManager;

/// Magic value stamped at the start of every large-document index page.
const INDEX_MAGIC: u32 = 0x4C44_4F43; // "LDOC" read as a little-endian u32
const INDEX_FIXED_FIELDS_SIZE: usize = 4 + 4 + 4 + 4; // magic, total_length, page_count, first_data_page_id
const DATA_PAGE_HEADER_SIZE: usize = 8; // page_number:u32, next_page_id:u32

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexPayload {
    total_length: u32,
    page_count: u32,
    first_data_page_id: u32,
    collection_name: String,
}

fn encode_index_payload(payload: &IndexPayload) -> Vec<u8> {
    let name_bytes = payload.collection_name.as_bytes();
    let mut buf = vec![0u8; INDEX_FIXED_FIELDS_SIZE + 4 + name_bytes.len()];
    LittleEndian::write_u32(&mut buf[0..4], INDEX_MAGIC);
    LittleEndian::write_u32(&mut buf[4..8], payload.total_length);
    LittleEndian::write_u32(&mut buf[8..12], payload.page_count);
    LittleEndian::write_u32(&mut buf[12..16], payload.first_data_page_id);
    LittleEndian::write_u32(&mut buf[16..20], name_bytes.len() as u32);
    buf[20..20 + name_bytes.len()].copy_from_slice(name_bytes);
    buf
}

fn decode_index_payload(buf: &[u8]) -> StorageResult<IndexPayload> {
    if buf.len() < INDEX_FIXED_FIELDS_SIZE + 4 {
        return Err(StorageError::invalid_operation("large document index page payload truncated"));
    }
    let magic = LittleEndian::read_u32(&buf[0..4]);
    if magic != INDEX_MAGIC {
        return Err(StorageError::invalid_operation("large document index page magic mismatch"));
    }
    let total_length = LittleEndian::read_u32(&buf[4..8]);
    let page_count = LittleEndian::read_u32(&buf[8..12]);
    let first_data_page_id = LittleEndian::read_u32(&buf[12..16]);
    let name_len = LittleEndian::read_u32(&buf[16..20]) as usize;
    let name_start = 20;
    let name_end = name_start + name_len;
    if buf.len() < name_end {
        return Err(StorageError::invalid_operation("large document collection name truncated"));
    }
    let collection_name = String::from_utf8(buf[name_start..name_end].to_vec())
        .map_err(|_| StorageError::invalid_operation("large document collection name is not valid utf-8"))?;
    Ok(IndexPayload {
        total_length,
        page_count,
        first_data_page_id,
        collection_name,
    })
}

fn encode_data_chunk(page_number: u32, next_page_id: u32, chunk: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; DATA_PAGE_HEADER_SIZE + chunk.len()];
    LittleEndian::write_u32(&mut buf[0..4], page_number);
    LittleEndian::write_u32(&mut buf[4..8], next_page_id);
    buf[DATA_PAGE_HEADER_SIZE..].copy_from_slice(chunk);
    buf
}

fn decode_data_chunk_header(buf: &[u8]) -> StorageResult<(u32, u32)> {
    if buf.len() < DATA_PAGE_HEADER_SIZE {
        return Err(StorageError::invalid_operation("large document data page payload truncated"));
    }
    Ok((
        LittleEndian::read_u32(&buf[0..4]),
        LittleEndian::read_u32(&buf[4..8]),
    ))
}

#[derive(Debug, Clone)]
pub struct LargeDocumentStatistics {
    pub index_page_id: u32,
    pub total_length: u32,
    pub page_count: u32,
    pub first_data_page_id: u32,
}

impl std::fmt::Display for LargeDocumentStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LargeDoc[Index={}, Size={} bytes, Pages={}]",
            self.index_page_id, self.total_length, self.page_count
        )
    }
}

/// Stores payloads too large for a single page as an index page plus a
/// singly-linked chain of data pages.
pub struct LargeDocumentStorage {
    page_manager: Arc<PageManager>,
    page_size: u32,
}

impl LargeDocumentStorage {
    pub fn new(page_manager: Arc<PageManager>, page_size: u32) -> LargeDocumentStorage {
        LargeDocumentStorage { page_manager, page_size }
    }

    fn chunk_capacity(&self) -> usize {
        self.page_size as usize - HEADER_SIZE - DATA_PAGE_HEADER_SIZE
    }

    pub fn store_large_document(&self, payload: &[u8], collection_name: &str) -> StorageResult<u32> {
        let index_page = self.page_manager.new_page(PageType::LargeDocumentIndex)?;
        let index_id = index_page.lock().unwrap().page_id();

        let capacity = self.chunk_capacity();
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&payload[0..0]]
        } else {
            payload.chunks(capacity).collect()
        };
        let page_count = chunks.len() as u32;

        let mut data_pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            data_pages.push(self.page_manager.new_page(PageType::LargeDocumentData)?);
        }
        let ids: Vec<u32> = data_pages.iter().map(|p| p.lock().unwrap().page_id()).collect();

        for (k, data_page) in data_pages.iter().enumerate() {
            let next_id = ids.get(k + 1).copied().unwrap_or(0);
            let prev_id = if k == 0 { 0 } else { ids[k - 1] };
            let mut guard = data_page.lock().unwrap();
            guard.update_page_type(PageType::LargeDocumentData)?;
            guard.set_links(prev_id, next_id)?;
            let encoded = encode_data_chunk(k as u32, next_id, chunks[k]);
            guard.write_data(0, &encoded)?;
            drop(guard);
            self.page_manager.save_page(data_page)?;
        }

        let index_payload = encode_index_payload(&IndexPayload {
            total_length: payload.len() as u32,
            page_count,
            first_data_page_id: ids[0],
            collection_name: collection_name.to_string(),
        });
        {
            let mut guard = index_page.lock().unwrap();
            guard.write_data(0, &index_payload)?;
        }
        self.page_manager.save_page(&index_page)?;

        Ok(index_id)
    }

    pub fn read_large_document(&self, index_page_id: u32) -> StorageResult<Vec<u8>> {
        let index_payload = self.load_index_payload(index_page_id)?;

        let mut result = Vec::with_capacity(index_payload.total_length as usize);
        let mut current_id = index_payload.first_data_page_id;
        for expected_number in 0..index_payload.page_count {
            if current_id == 0 {
                break;
            }
            let data_page = self.page_manager.get_page(current_id, true)?;
            let guard = data_page.lock().unwrap();
            if guard.page_type() != PageType::LargeDocumentData {
                return Err(StorageError::invalid_operation(format!(
                    "page {} in large document chain is not a data page",
                    current_id
                )));
            }
            let capacity = self.chunk_capacity();
            let raw = guard.read_data(0, DATA_PAGE_HEADER_SIZE + capacity)?;
            let (page_number, next_id) = decode_data_chunk_header(&raw)?;
            if page_number != expected_number {
                return Err(StorageError::invalid_operation(format!(
                    "large document chain page number mismatch: expected {}, found {}",
                    expected_number, page_number
                )));
            }
            result.extend_from_slice(&raw[DATA_PAGE_HEADER_SIZE..]);
            current_id = next_id;
        }

        result.truncate(index_payload.total_length as usize);
        Ok(result)
    }

    pub fn validate_large_document(&self, index_page_id: u32) -> bool {
        if index_page_id == 0 {
            return false;
        }
        let index_payload = match self.load_index_payload(index_page_id) {
            Ok(p) => p,
            Err(_) => return false,
        };

        let mut current_id = index_payload.first_data_page_id;
        let mut seen = 0u32;
        while current_id != 0 {
            let data_page = match self.page_manager.get_page(current_id, true) {
                Ok(p) => p,
                Err(_) => return false,
            };
            let guard = data_page.lock().unwrap();
            if guard.page_type() != PageType::LargeDocumentData {
                return false;
            }
            let capacity = self.chunk_capacity();
            let raw = match guard.read_data(0, DATA_PAGE_HEADER_SIZE + capacity) {
                Ok(r) => r,
                Err(_) => return false,
            };
            let (page_number, next_id) = match decode_data_chunk_header(&raw) {
                Ok(v) => v,
                Err(_) => return false,
            };
            if page_number != seen {
                return false;
            }
            seen += 1;
            if seen > index_payload.page_count {
                return false; // unexpected extra page beyond page_count
            }
            current_id = next_id;
        }

        seen == index_payload.page_count
    }

    pub fn delete_large_document(&self, index_page_id: u32) -> StorageResult<()> {
        let index_page = self.page_manager.get_page(index_page_id, true)?;
        let page_type = index_page.lock().unwrap().page_type();
        if page_type != PageType::LargeDocumentIndex {
            return Ok(());
        }
        let index_payload = self.load_index_payload(index_page_id)?;

        let mut current_id = index_payload.first_data_page_id;
        for _ in 0..index_payload.page_count {
            if current_id == 0 {
                break;
            }
            let data_page = self.page_manager.get_page(current_id, true)?;
            let guard = data_page.lock().unwrap();
            let capacity = self.chunk_capacity();
            let raw = guard.read_data(0, DATA_PAGE_HEADER_SIZE + capacity)?;
            drop(guard);
            let (_, next_id) = decode_data_chunk_header(&raw)?;
            self.page_manager.free_page(current_id)?;
            current_id = next_id;
        }

        self.page_manager.free_page(index_page_id)?;
        Ok(())
    }

    pub fn get_statistics(&self, index_page_id: u32) -> StorageResult<LargeDocumentStatistics> {
        let index_payload = self.load_index_payload(index_page_id)?;
        Ok(LargeDocumentStatistics {
            index_page_id,
            total_length: index_payload.total_length,
            page_count: index_payload.page_count,
            first_data_page_id: index_payload.first_data_page_id,
        })
    }

    fn load_index_payload(&self, index_page_id: u32) -> StorageResult<IndexPayload> {
        let index_page = self.page_manager.get_page(index_page_id, true)?;
        let guard = index_page.lock().unwrap();
        if guard.page_type() != PageType::LargeDocumentIndex {
            return Err(StorageError::invalid_operation(format!(
                "page {} is not a large document index page",
                index_page_id
            )));
        }
        let raw = guard.read_data(0, self.page_size as usize - HEADER_SIZE)?;
        decode_index_payload(&raw)
    }
}
