/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::page::Page;

/// Safe LRU cache of resident pages, keyed by page id.
///
/// Recency is tracked with a monotonic tick rather than an intrusive linked
/// list: a `BTreeMap<tick, page_id>` gives O(log n) promote/evict without any
/// unsafe pointer juggling. Each entry is an `Arc<Mutex<Page>>` so that a
/// cache hit returns the same shared instance a prior caller may still be
/// holding (`PageManager::get_page`'s "reference-identical" contract), while
/// still allowing distinct pages to be locked independently.
pub struct PageCache {
    entries: HashMap<u32, Arc<Mutex<Page>>>,
    order: BTreeMap<u64, u32>,
    last_used: HashMap<u32, u64>,
    tick: AtomicU64,
    max_size: i64,
}

impl PageCache {
    pub fn new(max_size: i64) -> PageCache {
        PageCache {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            last_used: HashMap::new(),
            tick: AtomicU64::new(0),
            max_size,
        }
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, page_id: u32) -> bool {
        self.entries.contains_key(&page_id)
    }

    /// Returns the cached entry, if any, promoting it to most-recently-used.
    pub fn get(&mut self, page_id: u32) -> Option<Arc<Mutex<Page>>> {
        let entry = self.entries.get(&page_id).cloned();
        if entry.is_some() {
            self.touch(page_id);
        }
        entry
    }

    fn touch(&mut self, page_id: u32) {
        let t = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(old) = self.last_used.insert(page_id, t) {
            self.order.remove(&old);
        }
        self.order.insert(t, page_id);
    }

    /// Inserts or replaces an entry, then evicts LRU unpinned entries down to
    /// `max_size`. Returns the ids evicted. If every resident page is
    /// pinned, eviction stops and the cache is left temporarily over
    /// capacity; the next mutating call retries.
    pub fn insert(&mut self, page_id: u32, page: Arc<Mutex<Page>>) -> Vec<u32> {
        self.entries.insert(page_id, page);
        self.touch(page_id);
        self.evict_over_capacity()
    }

    fn evict_over_capacity(&mut self) -> Vec<u32> {
        let mut evicted = Vec::new();
        if self.max_size < 0 {
            return evicted;
        }
        while self.entries.len() as i64 > self.max_size {
            let victim = self.order.iter().find_map(|(&t, &id)| match self.entries.get(&id) {
                Some(entry) if !entry.lock().unwrap().is_pinned() => Some((t, id)),
                None => Some((t, id)), // stale order entry: drop it, not an eviction
                _ => None,
            });
            match victim {
                Some((t, id)) => {
                    let was_present = self.entries.remove(&id).is_some();
                    self.order.remove(&t);
                    self.last_used.remove(&id);
                    if was_present {
                        evicted.push(id);
                    }
                }
                None => break,
            }
        }
        evicted
    }

    /// Removes a single entry unconditionally, e.g. on `free_page` or
    /// `restore_page` invalidation.
    pub fn remove(&mut self, page_id: u32) -> Option<Arc<Mutex<Page>>> {
        if let Some(t) = self.last_used.remove(&page_id) {
            self.order.remove(&t);
        }
        self.entries.remove(&page_id)
    }

    /// Evicts LRU entries until at most `keep` remain.
    pub fn clear_to(&mut self, keep: usize) -> Vec<u32> {
        let mut evicted = Vec::new();
        while self.entries.len() > keep {
            let next = self.order.iter().next().map(|(&t, &id)| (t, id));
            match next {
                Some((t, id)) => {
                    self.order.remove(&t);
                    self.last_used.remove(&id);
                    self.entries.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn dirty_entries(&self) -> Vec<(u32, Arc<Mutex<Page>>)> {
        self.entries
            .iter()
            .filter(|(_, page)| page.lock().unwrap().is_dirty())
            .map(|(&id, page)| (id, Arc::clone(page)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageType, TickSource};

    fn mk_page(id: u32) -> Arc<Mutex<Page>> {
        Arc::new(Mutex::new(
            Page::new(id, 4096, PageType::Data, TickSource::new()).unwrap(),
        ))
    }

    #[test]
    fn evicts_lru_when_over_capacity() {
        let mut cache = PageCache::new(2);
        cache.insert(1, mk_page(1));
        cache.insert(2, mk_page(2));
        let evicted = cache.insert(3, mk_page(3));
        assert_eq!(evicted, vec![1]);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn get_promotes_to_most_recently_used() {
        let mut cache = PageCache::new(2);
        cache.insert(1, mk_page(1));
        cache.insert(2, mk_page(2));
        cache.get(1); // promote 1, making 2 the LRU
        let evicted = cache.insert(3, mk_page(3));
        assert_eq!(evicted, vec![2]);
    }

    #[test]
    fn pinned_pages_are_never_evicted() {
        let mut cache = PageCache::new(1);
        let p1 = mk_page(1);
        p1.lock().unwrap().pin();
        cache.insert(1, p1);
        let evicted = cache.insert(2, mk_page(2));
        // no unpinned victim: overshoot tolerated
        assert!(evicted.is_empty());
        assert!(cache.contains(1));
        assert!(cache.contains(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_returns_reference_identical_instance() {
        let mut cache = PageCache::new(10);
        let page = mk_page(1);
        cache.insert(1, Arc::clone(&page));
        let fetched = cache.get(1).unwrap();
        assert!(Arc::ptr_eq(&page, &fetched));
    }

    #[test]
    fn clear_to_evicts_down_to_keep() {
        let mut cache = PageCache::new(10);
        cache.insert(1, mk_page(1));
        cache.insert(2, mk_page(2));
        cache.insert(3, mk_page(3));
        let evicted = cache.clear_to(1);
        assert_eq!(evicted.len(), 2);
        assert_eq!(cache.len(), 1);
    }
}
