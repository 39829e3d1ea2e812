/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Handle returned by [`DiskStream::lock_region`], required to release the
/// lock via [`DiskStream::unlock_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionLockHandle(u64);

#[derive(Debug, Clone)]
pub struct DiskStreamStatistics {
    pub path: PathBuf,
    pub size: u64,
    pub position: u64,
    pub readable: bool,
    pub writable: bool,
    pub seekable: bool,
}

impl std::fmt::Display for DiskStreamStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DiskStream[path={}, size={}, position={}]",
            self.path.display(),
            self.size,
            self.position
        )
    }
}

struct LockedRange {
    handle: u64,
    offset: u64,
    length: u64,
}

/// In-process advisory byte-range lock table. Overlapping ranges block until
/// release; non-overlapping ranges proceed concurrently. This is deliberately
/// not built on `fcntl`/`flock` byte-range locks: POSIX record locks do not
/// block other threads of the same process, only other processes, and the
/// contract here requires intra-process blocking.
struct RegionLockTable {
    active: Mutex<Vec<LockedRange>>,
    issued: Mutex<HashSet<u64>>,
    condvar: Condvar,
    next_handle: AtomicU64,
}

impl RegionLockTable {
    fn new() -> Self {
        RegionLockTable {
            active: Mutex::new(Vec::new()),
            issued: Mutex::new(HashSet::new()),
            condvar: Condvar::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn lock(&self, offset: u64, length: u64) -> RegionLockHandle {
        let end = offset + length;
        let mut active = self.active.lock().unwrap();
        while active
            .iter()
            .any(|r| r.offset < end && offset < r.offset + r.length)
        {
            active = self.condvar.wait(active).unwrap();
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        active.push(LockedRange {
            handle,
            offset,
            length,
        });
        self.issued.lock().unwrap().insert(handle);
        RegionLockHandle(handle)
    }

    fn unlock(&self, handle: RegionLockHandle) -> StorageResult<()> {
        if !self.issued.lock().unwrap().contains(&handle.0) {
            return Err(StorageError::invalid_argument(format!(
                "unknown region lock handle {}",
                handle.0
            )));
        }
        let mut active = self.active.lock().unwrap();
        active.retain(|r| r.handle != handle.0);
        drop(active);
        self.condvar.notify_all();
        Ok(())
    }
}

/// Typed, page-aligned wrapper over a file handle opened for shared
/// read/write access, with advisory byte-range region locks layered on top.
pub struct DiskStream {
    path: PathBuf,
    file: Arc<File>,
    position: AtomicU64,
    disposed: AtomicBool,
    lock_table: RegionLockTable,
}

impl DiskStream {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<DiskStream> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        acquire_exclusive_file_lock(&file).map_err(|_| {
            StorageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                format!("database file {} is already open by another process", path.display()),
            ))
        })?;
        Ok(DiskStream {
            path,
            file: Arc::new(file),
            position: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            lock_table: RegionLockTable::new(),
        })
    }

    fn ensure_not_disposed(&self) -> StorageResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StorageError::disposed("disk stream is disposed"));
        }
        Ok(())
    }

    pub fn read_page(&self, offset: u64, size: usize) -> StorageResult<Vec<u8>> {
        self.ensure_not_disposed()?;
        let mut buf = vec![0u8; size];
        self.file.read_exact_at(&mut buf, offset)?;
        self.position.store(offset + size as u64, Ordering::Relaxed);
        Ok(buf)
    }

    pub fn write_page(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.file.write_all_at(data, offset)?;
        self.position
            .store(offset + data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn read_page_async(
        &self,
        offset: u64,
        size: usize,
        cancel: CancellationToken,
    ) -> StorageResult<Vec<u8>> {
        self.ensure_not_disposed()?;
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        let file = Arc::clone(&self.file);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Canceled),
            joined = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
                let mut buf = vec![0u8; size];
                file.read_exact_at(&mut buf, offset)?;
                Ok(buf)
            }) => {
                let buf = joined.map_err(|e| {
                    StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
                })??;
                self.position.store(offset + size as u64, Ordering::Relaxed);
                Ok(buf)
            }
        }
    }

    pub async fn write_page_async(
        &self,
        offset: u64,
        data: Vec<u8>,
        cancel: CancellationToken,
    ) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        let file = Arc::clone(&self.file);
        let len = data.len() as u64;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Canceled),
            joined = tokio::task::spawn_blocking(move || -> io::Result<()> {
                file.write_all_at(&data, offset)
            }) => {
                joined.map_err(|e| {
                    StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
                })??;
                self.position.store(offset + len, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Truncates or extends the file to exactly `len` bytes. Extension
    /// zero-fills (the OS creates a sparse hole that reads back as zero).
    pub fn set_length(&self, len: u64) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub async fn flush_async(&self, cancel: CancellationToken) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        if cancel.is_cancelled() {
            return Err(StorageError::Canceled);
        }
        let file = Arc::clone(&self.file);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Canceled),
            joined = tokio::task::spawn_blocking(move || file.sync_all()) => {
                joined.map_err(|e| {
                    StorageError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
                })??;
                Ok(())
            }
        }
    }

    /// Acquires an advisory byte-range lock. Overlapping ranges block the
    /// calling thread until the overlapping lock is released; the ranges are
    /// half-open (`[offset, offset+length)`), so adjacent ranges never
    /// contend.
    pub fn lock_region(&self, offset: u64, length: u64) -> StorageResult<RegionLockHandle> {
        self.ensure_not_disposed()?;
        Ok(self.lock_table.lock(offset, length))
    }

    /// Releases a region lock. Double-unlock of an already-released handle is
    /// accepted silently; an unknown handle fails with `InvalidArgument`.
    pub fn unlock_region(&self, handle: RegionLockHandle) -> StorageResult<()> {
        self.ensure_not_disposed()?;
        self.lock_table.unlock(handle)
    }

    pub fn get_statistics(&self) -> StorageResult<DiskStreamStatistics> {
        self.ensure_not_disposed()?;
        let size = self.file.metadata()?.len();
        Ok(DiskStreamStatistics {
            path: self.path.clone(),
            size,
            position: self.position.load(Ordering::Relaxed),
            readable: true,
            writable: true,
            seekable: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

#[cfg(unix)]
fn acquire_exclusive_file_lock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn acquire_exclusive_file_lock(file: &File) -> io::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    let handle = file.as_raw_handle() as winapi::um::winnt::HANDLE;
    let mut overlapped: OVERLAPPED = unsafe { MaybeUninit::zeroed().assume_init() };
    let ok = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            !0,
            !0,
            &mut overlapped,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
