/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Storage engine core for an embedded document database.
//!
//! This crate owns the hardest part of an embedded document store: durably
//! mapping a flat file into fixed-size pages, caching them with LRU eviction
//! and pinning, write-ahead logging and crash replay, background durability
//! scheduling at configurable write concerns, and chaining for documents
//! larger than a single page.
//!
//! Everything above pages (the document value model, collections, indexes,
//! query planning) is a collaborator that sits on top of this crate and is
//! out of scope here.

extern crate core;

mod config;
mod disk_stream;
mod engine;
mod error;
mod flush_scheduler;
mod large_document;
mod page;
mod page_manager;
mod pagecache;
mod wal;

#[doc(hidden)]
pub mod test_utils;

pub use config::Config;
pub use disk_stream::{DiskStream, DiskStreamStatistics, RegionLockHandle};
pub use engine::StorageEngine;
pub use error::{StorageError, StorageResult};
pub use flush_scheduler::{DurabilityBackend, FlushScheduler, WriteConcern};
pub use large_document::{LargeDocumentStatistics, LargeDocumentStorage};
pub use page::{Page, PageHeader, PageType, HEADER_SIZE};
pub use page_manager::{PageManager, PageManagerStatistics};
pub use wal::WriteAheadLog;
