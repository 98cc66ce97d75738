// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! A time-bounded set used to suppress duplicate message deliveries.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use fnv::FnvHashSet;

struct Element<Key> {
    /// The key being inserted.
    key: Key,
    /// The instant the key was inserted.
    inserted: Instant,
}

/// Remembers keys for a bounded validity window.
///
/// Expired entries are evicted lazily whenever the cache is touched; there is
/// no background task.
pub(crate) struct DuplicateCache<Key> {
    /// The live keys.
    map: FnvHashSet<Key>,
    /// An ordered list of keys by insert time.
    list: VecDeque<Element<Key>>,
    /// The time elements remain in the cache.
    ttl: Duration,
}

impl<Key> DuplicateCache<Key>
where
    Key: Eq + std::hash::Hash + Clone,
{
    pub(crate) fn new(ttl: Duration) -> Self {
        DuplicateCache {
            map: FnvHashSet::default(),
            list: VecDeque::new(),
            ttl,
        }
    }

    /// Inserts a key, evicting any expired entries first.
    ///
    /// Returns `true` if the key was not present within the validity window,
    /// `false` if it is a live duplicate. Check-then-set is fused into this
    /// single call so callers cannot race the check against the insert.
    pub(crate) fn insert(&mut self, key: Key) -> bool {
        let now = Instant::now();
        self.remove_expired(now);

        if !self.map.insert(key.clone()) {
            return false;
        }
        self.list.push_back(Element { key, inserted: now });
        true
    }

    fn remove_expired(&mut self, now: Instant) {
        while let Some(element) = self.list.pop_front() {
            if element.inserted + self.ttl > now {
                self.list.push_front(element);
                break;
            }
            self.map.remove(&element.key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_added_entries_exist() {
        let mut cache = DuplicateCache::new(Duration::from_secs(10));

        cache.insert("t");
        cache.insert("e");

        // Should report that 't' and 'e' already exist
        assert!(!cache.insert("t"));
        assert!(!cache.insert("e"));
    }

    #[test]
    fn cache_entries_expire() {
        let mut cache = DuplicateCache::new(Duration::from_millis(100));

        cache.insert("t");
        assert!(!cache.insert("t"));
        cache.insert("e");
        assert!(!cache.insert("e"));
        // sleep until cache expiry
        std::thread::sleep(Duration::from_millis(101));

        // should have been evicted
        assert!(cache.insert("t"));
        assert!(cache.insert("e"));
    }

    #[test]
    fn reinserting_live_entry_does_not_extend_window() {
        let mut cache = DuplicateCache::new(Duration::from_millis(100));

        cache.insert("t");
        std::thread::sleep(Duration::from_millis(60));
        // still live, reinsert is reported as a duplicate
        assert!(!cache.insert("t"));
        std::thread::sleep(Duration::from_millis(60));

        // the original insertion time governs expiry
        assert!(cache.insert("t"));
    }
}
