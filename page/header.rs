/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{StorageError, StorageResult};

/// On-disk type tag of a page. `Empty` marks a page that is on the free list
/// or has never been allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PageType {
    Empty = 0,
    Data = 1,
    Index = 2,
    Collection = 3,
    Header = 4,
    LargeDocumentIndex = 5,
    LargeDocumentData = 6,
}

/// Fixed 41-byte header prefixed to every page. All multi-byte integers are
/// little-endian.
pub const HEADER_SIZE: usize = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub page_id: u32,
    pub prev_page_id: u32,
    pub next_page_id: u32,
    pub free_bytes: u16,
    pub item_count: u16,
    pub version: u32,
    pub created_at: u64,
    pub modified_at: u64,
    pub checksum: u32,
}

impl PageHeader {
    pub fn new(page_id: u32, page_type: PageType, payload_len: u16, tick: u64) -> PageHeader {
        PageHeader {
            page_type,
            page_id,
            prev_page_id: 0,
            next_page_id: 0,
            free_bytes: payload_len,
            item_count: 0,
            version: 0,
            created_at: tick,
            modified_at: tick,
            checksum: 0,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.page_type.into();
        LittleEndian::write_u32(&mut buf[1..5], self.page_id);
        LittleEndian::write_u32(&mut buf[5..9], self.prev_page_id);
        LittleEndian::write_u32(&mut buf[9..13], self.next_page_id);
        LittleEndian::write_u16(&mut buf[13..15], self.free_bytes);
        LittleEndian::write_u16(&mut buf[15..17], self.item_count);
        LittleEndian::write_u32(&mut buf[17..21], self.version);
        LittleEndian::write_u64(&mut buf[21..29], self.created_at);
        LittleEndian::write_u64(&mut buf[29..37], self.modified_at);
        LittleEndian::write_u32(&mut buf[37..41], self.checksum);
    }

    pub fn decode(buf: &[u8]) -> StorageResult<PageHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "page buffer too small for header: {} < {}",
                buf.len(),
                HEADER_SIZE
            )));
        }
        let page_type = PageType::try_from_primitive(buf[0])
            .map_err(|_| StorageError::invalid_argument(format!("unknown page type byte {}", buf[0])))?;
        Ok(PageHeader {
            page_type,
            page_id: LittleEndian::read_u32(&buf[1..5]),
            prev_page_id: LittleEndian::read_u32(&buf[5..9]),
            next_page_id: LittleEndian::read_u32(&buf[9..13]),
            free_bytes: LittleEndian::read_u16(&buf[13..15]),
            item_count: LittleEndian::read_u16(&buf[15..17]),
            version: LittleEndian::read_u32(&buf[17..21]),
            created_at: LittleEndian::read_u64(&buf[21..29]),
            modified_at: LittleEndian::read_u64(&buf[29..37]),
            checksum: LittleEndian::read_u32(&buf[37..41]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let header = PageHeader {
            page_type: PageType::Data,
            page_id: 7,
            prev_page_id: 1,
            next_page_id: 2,
            free_bytes: 100,
            item_count: 3,
            version: 42,
            created_at: 1000,
            modified_at: 2000,
            checksum: 0xdeadbeef,
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn unknown_page_type_byte_fails() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = 0xFF;
        assert!(PageHeader::decode(&buf).is_err());
    }

    #[test]
    fn buffer_too_small_fails() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(PageHeader::decode(&buf).is_err());
    }
}
