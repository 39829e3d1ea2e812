/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter scoped to a single storage engine instance, used for
/// `created_at`/`modified_at` page stamps. This is deliberately per-instance
/// state (a `TickSource` is owned and cloned from one `PageManager`) rather
/// than a process-wide static counter.
#[derive(Clone)]
pub struct TickSource(Arc<AtomicU64>);

impl TickSource {
    pub fn new() -> TickSource {
        TickSource(Arc::new(AtomicU64::new(0)))
    }

    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for TickSource {
    fn default() -> Self {
        TickSource::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_strictly_increase() {
        let source = TickSource::new();
        let a = source.tick();
        let b = source.tick();
        assert!(b > a);
    }

    #[test]
    fn cloned_sources_share_the_same_counter() {
        let source = TickSource::new();
        let clone = source.clone();
        let a = source.tick();
        let b = clone.tick();
        assert!(b > a);
    }
}
