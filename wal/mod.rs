/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

mod record;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};
use record::{decode_header, encode_record, max_record_size, RecordHeader, RECORD_HEADER_SIZE, RECORD_TYPE_PAGE};

struct Inner {
    file: File,
    /// Length of the durable (written + fsynced) prefix of the file.
    file_len: u64,
    /// Records appended since the last flush, not yet written to disk.
    pending: Vec<u8>,
    appended_lsn: u64,
    flushed_lsn: u64,
}

/// Append-only, crash-recoverable log of page snapshots.
///
/// When constructed with `enabled = false`, every mutating operation is a
/// no-op and `replay` applies nothing — callers that don't want WAL-backed
/// durability pay no cost beyond the enum check.
pub struct WriteAheadLog {
    path: PathBuf,
    page_size: u32,
    enabled: bool,
    inner: Option<Mutex<Inner>>,
}

impl WriteAheadLog {
    /// Derives the WAL path from a database file path: `{stem}-wal.{ext}` in
    /// the same directory. A bare filename (no directory component) resolves
    /// to the current directory implicitly (an empty prefix).
    pub fn wal_path_for(db_path: &Path) -> PathBuf {
        let dir = db_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let filename = match db_path.extension() {
            Some(ext) => format!("{}-wal.{}", stem, ext.to_string_lossy()),
            None => format!("{}-wal", stem),
        };
        dir.join(filename)
    }

    pub fn open(db_path: impl AsRef<Path>, page_size: u32, enabled: bool) -> StorageResult<WriteAheadLog> {
        let path = Self::wal_path_for(db_path.as_ref());
        if !enabled {
            return Ok(WriteAheadLog {
                path,
                page_size,
                enabled: false,
                inner: None,
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        Ok(WriteAheadLog {
            path,
            page_size,
            enabled: true,
            inner: Some(Mutex::new(Inner {
                file,
                file_len,
                pending: Vec::new(),
                appended_lsn: 0,
                flushed_lsn: 0,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn inner(&self) -> &Mutex<Inner> {
        self.inner.as_ref().expect("WAL inner state present when enabled")
    }

    pub fn flushed_lsn(&self) -> u64 {
        match &self.inner {
            Some(inner) => inner.lock().unwrap().flushed_lsn,
            None => 0,
        }
    }

    pub fn appended_lsn(&self) -> u64 {
        match &self.inner {
            Some(inner) => inner.lock().unwrap().appended_lsn,
            None => 0,
        }
    }

    pub fn has_pending_entries(&self) -> bool {
        match &self.inner {
            Some(inner) => !inner.lock().unwrap().pending.is_empty(),
            None => false,
        }
    }

    /// Buffers a page snapshot as the next WAL entry, assigning it the next
    /// LSN. A no-op returning LSN 0 when the WAL is disabled.
    pub fn append_page(&self, page_id: u32, snapshot: &[u8]) -> StorageResult<u64> {
        if !self.enabled {
            return Ok(0);
        }
        let mut inner = self.inner().lock().unwrap();
        let record = encode_record(page_id, snapshot);
        inner.pending.extend_from_slice(&record);
        inner.appended_lsn += 1;
        Ok(inner.appended_lsn)
    }

    pub async fn append_page_async(&self, page_id: u32, snapshot: &[u8]) -> StorageResult<u64> {
        self.append_page(page_id, snapshot)
    }

    /// Writes the buffered tail to disk and fsyncs, advancing `flushed_lsn`.
    pub fn flush_log(&self) -> StorageResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut inner = self.inner().lock().unwrap();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> StorageResult<()> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        inner.file.write_all_at(&inner.pending, inner.file_len)?;
        inner.file.sync_all()?;
        inner.file_len += inner.pending.len() as u64;
        inner.pending.clear();
        inner.flushed_lsn = inner.appended_lsn;
        Ok(())
    }

    pub async fn flush_log_async(&self, cancel: CancellationToken) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        self.flush_log()
    }

    /// Flushes only if `target` is not already durable. Safe against a
    /// racing concurrent flush: the condition is re-checked under the lock.
    pub fn flush_to_lsn(&self, target: u64) -> StorageResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if target <= self.flushed_lsn() {
            return Ok(());
        }
        let mut inner = self.inner().lock().unwrap();
        if target <= inner.flushed_lsn {
            return Ok(());
        }
        self.flush_locked(&mut inner)
    }

    pub async fn flush_to_lsn_async(&self, target: u64, cancel: CancellationToken) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        self.flush_to_lsn(target)
    }

    /// Zero-sizes the WAL file. Only safe once every appended entry has been
    /// durably installed into the database file.
    pub fn truncate(&self) -> StorageResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut inner = self.inner().lock().unwrap();
        inner.file.set_len(0)?;
        inner.file_len = 0;
        inner.pending.clear();
        Ok(())
    }

    pub async fn truncate_async(&self, cancel: CancellationToken) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        self.truncate()
    }

    /// Atomic sequence: flush the WAL, invoke `apply_to_pages` (typically
    /// flushing dirty buffer-pool pages and fsyncing the database file), then
    /// truncate the WAL. Any failure aborts before truncation so the WAL is
    /// preserved for recovery.
    pub async fn synchronize_async<F, Fut>(&self, apply_to_pages: F) -> StorageResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = StorageResult<()>>,
    {
        self.flush_log_async(CancellationToken::new()).await?;
        apply_to_pages().await?;
        self.truncate_async(CancellationToken::new()).await?;
        Ok(())
    }

    /// Replays every validated record from offset zero through `apply_fn`.
    /// The first invalid record stops replay and the WAL is truncated to the
    /// last good boundary. Returns the number of records applied.
    pub async fn replay<F>(&self, mut apply_fn: F, cancel: CancellationToken) -> StorageResult<usize>
    where
        F: FnMut(u32, Vec<u8>) -> StorageResult<()>,
    {
        if !self.enabled {
            return Ok(0);
        }
        let mut inner = self.inner().lock().unwrap();
        let max_len = max_record_size(self.page_size);
        let mut pos: u64 = 0;
        let mut applied = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Canceled);
            }

            let mut header_buf = [0u8; RECORD_HEADER_SIZE];
            let read = read_exact_or_partial(&inner.file, &mut header_buf, pos)?;
            if read < RECORD_HEADER_SIZE {
                break; // torn or absent header: stop cleanly, nothing to discard beyond pos
            }
            let header: RecordHeader = decode_header(&header_buf);
            if header.record_type != RECORD_TYPE_PAGE || header.length <= 0 || header.length as usize > max_len {
                warn!(
                    "wal replay stopping at offset {}: invalid record header (type={}, length={})",
                    pos, header.record_type, header.length
                );
                break;
            }
            let length = header.length as usize;
            let mut payload = vec![0u8; length];
            let read = read_exact_or_partial(&inner.file, &mut payload, pos + RECORD_HEADER_SIZE as u64)?;
            if read < length {
                warn!("wal replay stopping at offset {}: torn payload", pos);
                break;
            }
            if crc32fast::hash(&payload) != header.crc32 {
                warn!("wal replay stopping at offset {}: crc mismatch", pos);
                break;
            }

            apply_fn(header.page_id, payload)?;
            applied += 1;
            pos += (RECORD_HEADER_SIZE + length) as u64;
        }

        debug!("wal replay applied {} record(s), truncating to offset {}", applied, pos);
        inner.file.set_len(pos)?;
        inner.file_len = pos;
        inner.pending.clear();
        Ok(applied)
    }
}

/// Reads up to `buf.len()` bytes at `offset`, returning however many bytes
/// were actually available (short of an error). Used to distinguish a torn
/// tail (partial record) from a hard I/O error during replay.
fn read_exact_or_partial(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                total += n;
                if total == buf.len() {
                    return Ok(total);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
