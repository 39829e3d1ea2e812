/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;

use crate::flush_scheduler::WriteConcern;

/// Tuning knobs for assembling a storage engine instance.
///
/// Every field has a sensible default; override individual fields with
/// struct-update syntax:
///
/// ```ignore
/// let config = Config { page_size: 8192, ..Config::default() };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size in bytes of every page in the database file. Must be a power of
    /// two and at least large enough to hold a page header.
    pub page_size: u32,
    /// Maximum number of pages kept resident in the buffer pool.
    pub max_cache_size: i64,
    /// Interval at which the flush scheduler's background task wakes to
    /// perform a best-effort durability pass.
    pub flush_interval: Duration,
    /// Whether the write-ahead log is active. When `false`, WAL append and
    /// truncate become no-ops and replay applies nothing.
    pub wal_enabled: bool,
    /// Write concern used by the flush scheduler's background loop.
    pub default_write_concern: WriteConcern,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 4096,
            max_cache_size: 1000,
            flush_interval: Duration::from_millis(500),
            wal_enabled: true,
            default_write_concern: WriteConcern::Journaled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = Config::default();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.max_cache_size, 1000);
        assert_eq!(config.flush_interval, Duration::from_millis(500));
        assert!(config.wal_enabled);
        assert_eq!(config.default_write_concern, WriteConcern::Journaled);
    }

    #[test]
    fn struct_update_overrides_single_field() {
        let config = Config {
            page_size: 8192,
            ..Config::default()
        };
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.max_cache_size, 1000);
    }
}
