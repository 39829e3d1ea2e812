/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};
use crate::page_manager::PageManager;
use crate::wal::WriteAheadLog;

/// A durability action a caller can await. Exists as a trait, rather than an
/// inherent method, so a database can swap in a different backend (e.g. a
/// no-op scheduler for a WAL-less configuration) without its callers caring
/// which concrete type they hold.
#[async_trait]
pub trait DurabilityBackend: Send + Sync {
    async fn ensure_durability_async(&self, concern: WriteConcern, cancel: CancellationToken) -> StorageResult<()>;
}

/// Caller-selected durability level passed to
/// [`FlushScheduler::ensure_durability_async`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// No durability guarantee beyond what the buffer pool already provides.
    None,
    /// Recoverable across a process crash: the WAL tail is fsynced.
    Journaled,
    /// `Journaled` plus a full database fsync and WAL truncation.
    Synced,
}

struct BatchState {
    notify: Arc<Notify>,
    active: bool,
}

/// Coordinates durability at three levels and runs a background task that
/// opportunistically flushes pending WAL/page state at a fixed interval.
///
/// Concurrent `Journaled` callers coalesce onto a single in-flight flush:
/// the first caller to observe no active batch starts one and every other
/// caller awaits its completion instead of issuing a redundant `fsync`.
pub struct FlushScheduler {
    page_manager: Arc<PageManager>,
    wal: Arc<WriteAheadLog>,
    disposed: Arc<AtomicBool>,
    batch: Arc<Mutex<BatchState>>,
    background_cancel: CancellationToken,
}

impl FlushScheduler {
    pub fn new(page_manager: Arc<PageManager>, wal: Arc<WriteAheadLog>, flush_interval: Duration) -> FlushScheduler {
        let background_cancel = CancellationToken::new();
        let scheduler = FlushScheduler {
            page_manager,
            wal,
            disposed: Arc::new(AtomicBool::new(false)),
            batch: Arc::new(Mutex::new(BatchState {
                notify: Arc::new(Notify::new()),
                active: false,
            })),
            background_cancel,
        };
        scheduler.spawn_background_loop(flush_interval);
        scheduler
    }

    fn spawn_background_loop(&self, flush_interval: Duration) {
        let page_manager = Arc::clone(&self.page_manager);
        let wal = Arc::clone(&self.wal);
        let cancel = self.background_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(flush_interval) => {
                        if let Err(e) = background_flush_pass(&page_manager, &wal).await {
                            warn!("background flush pass failed, will retry next interval: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// `true` once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Cancels the background loop and signals any outstanding batch as
    /// canceled. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.background_cancel.cancel();
        let mut batch = self.batch.lock().unwrap();
        batch.active = false;
        let old_notify = std::mem::replace(&mut batch.notify, Arc::new(Notify::new()));
        old_notify.notify_waiters();
    }

    async fn ensure_journaled(&self, cancel: CancellationToken) -> StorageResult<()> {
        if self.is_disposed() {
            if self.wal.has_pending_entries() {
                return Err(StorageError::disposed(
                    "flush scheduler disposed with pending WAL entries",
                ));
            }
            return Ok(());
        }

        if !self.wal.is_enabled() {
            self.page_manager.flush_dirty_pages_async(cancel.clone()).await?;
            self.page_manager.disk_stream().flush_async(cancel).await?;
            return Ok(());
        }

        if !self.wal.has_pending_entries() {
            return Ok(());
        }

        // The Notified future is created and enabled while `batch` is still
        // locked: the spawned flush task needs that same lock before it can
        // call notify_waiters, so enabling here guarantees registration
        // happens-before that call. Enabling after releasing the lock (or
        // just constructing `notified()` without enabling it) can lose the
        // wakeup if the flush task runs to completion first.
        let mut batch = self.batch.lock().unwrap();
        if !batch.active {
            batch.active = true;
            let wal = Arc::clone(&self.wal);
            let batch_state = Arc::clone(&self.batch);
            tokio::spawn(async move {
                let _ = wal.flush_log_async(CancellationToken::new()).await;
                let mut b = batch_state.lock().unwrap();
                b.active = false;
                let finished_notify = std::mem::replace(&mut b.notify, Arc::new(Notify::new()));
                finished_notify.notify_waiters();
            });
        }
        let notify = Arc::clone(&batch.notify);
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(batch);

        tokio::select! {
            _ = &mut notified => {}
            _ = cancel.cancelled() => return Err(StorageError::Canceled),
        }

        if self.is_disposed() {
            return Err(StorageError::Canceled);
        }
        Ok(())
    }
}

#[async_trait]
impl DurabilityBackend for FlushScheduler {
    async fn ensure_durability_async(&self, concern: WriteConcern, cancel: CancellationToken) -> StorageResult<()> {
        match concern {
            WriteConcern::None => Ok(()),
            WriteConcern::Journaled => self.ensure_journaled(cancel).await,
            WriteConcern::Synced => {
                self.ensure_journaled(cancel.clone()).await?;
                self.page_manager.flush_dirty_pages_async(cancel.clone()).await?;
                self.page_manager.disk_stream().flush_async(cancel.clone()).await?;
                self.wal.truncate_async(cancel).await?;
                Ok(())
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn background_flush_pass(page_manager: &Arc<PageManager>, wal: &Arc<WriteAheadLog>) -> StorageResult<()> {
    let cancel = CancellationToken::new();
    if wal.is_enabled() {
        if wal.has_pending_entries() {
            wal.flush_log_async(cancel).await?;
        }
    } else {
        page_manager.flush_dirty_pages_async(cancel).await?;
    }
    Ok(())
}
