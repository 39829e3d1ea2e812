/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/// Marker byte for the only record type this WAL currently writes: a full
/// page snapshot.
pub const RECORD_TYPE_PAGE: u8 = 0x01;

/// Fixed size of a WAL record header, per the wire format:
/// `type:u8, page_id:u32 LE, length:i32 LE, crc32:u32 LE`.
pub const RECORD_HEADER_SIZE: usize = 13;

/// Upper bound on a record's payload length: a page snapshot never exceeds
/// `page_size`, plus a little slack for bookkeeping payloads.
pub fn max_record_size(page_size: u32) -> usize {
    page_size as usize + 64
}

/// Serializes a WAL record: header plus payload. `payload` is typically a
/// full on-disk page image (the page's own header-recomputed CRC is
/// irrelevant here; this CRC covers the WAL payload bytes only).
pub fn encode_record(page_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.push(RECORD_TYPE_PAGE);
    buf.extend_from_slice(&page_id.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub record_type: u8,
    pub page_id: u32,
    pub length: i32,
    pub crc32: u32,
}

pub fn decode_header(buf: &[u8; RECORD_HEADER_SIZE]) -> RecordHeader {
    RecordHeader {
        record_type: buf[0],
        page_id: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
        length: i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
        crc32: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
    }
}
