//! Process-lifetime dedup state shared by every scan task.
//!
//! Two structures keep the scanner from repeating itself:
//!
//! - **[`ContentCache`]** remembers the SHA-256 fingerprint of every body that
//!   has been admitted, so identical content is scanned at most once.
//! - **[`FindingIndex`]** remembers every `(matched text, locator)` pair that has
//!   been reported, and which rule reported it first.
//!
//! Both sit on [`SeenMap`], a [`DashMap`] wrapper whose only mutation is an
//! atomic insert-if-absent ([`SeenMap::claim`]). By default a map grows for the
//! lifetime of the process. Given a capacity it evicts the least-recently-seen
//! entries: every hit refreshes an entry's tick, and eviction walks an insertion
//! queue, re-queueing entries that were refreshed since they were queued.

pub mod content;
pub mod findings;

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub use content::{ContentCache, Fingerprint};
pub use findings::{FindingIndex, FindingKey};

struct Slot<V> {
    value: V,
    last_seen: AtomicU64,
}

/// Concurrent claim map with optional least-recently-seen eviction.
pub struct SeenMap<K, V> {
    entries: DashMap<K, Slot<V>>,
    capacity: Option<usize>,
    order: Mutex<VecDeque<(K, u64)>>,
    clock: AtomicU64,
}

impl<K, V> SeenMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A map that never evicts.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// A map holding at most `capacity` entries. `None` or `Some(0)` means unbounded.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.filter(|&c| c > 0),
            order: Mutex::new(VecDeque::new()),
            clock: AtomicU64::new(0),
        }
    }

    /// Insert `key` with `value` if absent.
    ///
    /// Returns `true` only for the caller whose insert created the entry; every
    /// other caller, concurrent or later, gets `false` and refreshes the entry.
    pub fn claim(&self, key: K, value: V) -> bool {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        // The shard guard must be released before the order queue is locked.
        let inserted = match self.entries.entry(key.clone()) {
            Entry::Occupied(slot) => {
                slot.get().last_seen.store(tick, Ordering::Relaxed);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    value,
                    last_seen: AtomicU64::new(tick),
                });
                true
            }
        };

        if inserted {
            if let Some(capacity) = self.capacity {
                let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
                order.push_back((key, tick));
                self.evict_over(capacity, &mut order);
            }
        }
        inserted
    }

    fn evict_over(&self, capacity: usize, order: &mut VecDeque<(K, u64)>) {
        while self.entries.len() > capacity {
            let Some((key, tick)) = order.pop_front() else {
                break;
            };
            let evicted = self
                .entries
                .remove_if(&key, |_, slot| slot.last_seen.load(Ordering::Relaxed) == tick)
                .is_some();
            if evicted {
                continue;
            }
            let refreshed = self
                .entries
                .get(&key)
                .map(|slot| slot.last_seen.load(Ordering::Relaxed));
            if let Some(seen) = refreshed {
                order.push_back((key, seen));
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<K, V> SeenMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// The value stored by the caller that claimed `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|slot| slot.value.clone())
    }
}

impl<K, V> Default for SeenMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn first_claim_wins() {
        let map: SeenMap<&str, u8> = SeenMap::unbounded();
        assert!(map.claim("a", 1));
        assert!(!map.claim("a", 2));
        assert_eq!(map.get(&"a"), Some(1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let map: Arc<SeenMap<String, usize>> = Arc::new(SeenMap::unbounded());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let map = map.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if map.claim("same".to_string(), i) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unbounded_never_evicts() {
        let map: SeenMap<u32, ()> = SeenMap::with_capacity(Some(0));
        assert_eq!(map.capacity(), None);
        for i in 0..1000 {
            assert!(map.claim(i, ()));
        }
        assert_eq!(map.len(), 1000);
    }

    #[test]
    fn bounded_evicts_oldest() {
        let map: SeenMap<u32, ()> = SeenMap::with_capacity(Some(3));
        for i in 0..5 {
            map.claim(i, ());
        }
        assert_eq!(map.len(), 3);
        assert!(!map.contains(&0));
        assert!(!map.contains(&1));
        assert!(map.contains(&2));
        assert!(map.contains(&4));
    }

    #[test]
    fn bounded_keeps_recently_seen() {
        let map: SeenMap<u32, ()> = SeenMap::with_capacity(Some(3));
        map.claim(0, ());
        map.claim(1, ());
        map.claim(2, ());
        // Refresh 0 so 1 becomes the least recently seen.
        assert!(!map.claim(0, ()));
        map.claim(3, ());

        assert_eq!(map.len(), 3);
        assert!(map.contains(&0));
        assert!(!map.contains(&1));
        assert!(map.contains(&2));
        assert!(map.contains(&3));
    }

    #[test]
    fn evicted_key_can_be_claimed_again() {
        let map: SeenMap<u32, ()> = SeenMap::with_capacity(Some(1));
        assert!(map.claim(7, ()));
        assert!(map.claim(8, ()));
        assert!(!map.contains(&7));
        assert!(map.claim(7, ()));
    }
}
