//! Bounded in-process cache
//!
//! The fastest tier: a capacity-limited map from content key to value with
//! strict least-recently-used eviction. Entries are never expired by time;
//! only capacity pressure evicts, so a value here can outlive the backing
//! store's TTL. That is an accepted trade-off of this tier, not a defect:
//! the local cache only ever holds values observed from a backing-store hit
//! or written through `store`, and the backing store remains the authority
//! on expiry for keys the local cache has dropped.
//!
//! Eviction is deterministic: every `get` and `put` moves the touched entry
//! to the head of a recency list, so the tail is always the
//! least-recently-touched entry, with insertion order as the natural
//! secondary key for entries never touched since insert. The list is a
//! slab-backed doubly-linked list with a key→slot map, giving O(1) get,
//! put, and evict.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fingerprint::ContentKey;

struct Entry<V> {
    key: ContentKey,
    value: Arc<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Capacity-bounded LRU map from content key to `Arc<V>`.
///
/// Not internally synchronized: `ResponseCache` guards the whole structure
/// with a single mutex so eviction is atomic with respect to insertion and
/// recency updates.
pub struct LruCache<V> {
    capacity: usize,
    map: HashMap<ContentKey, usize>,
    slots: Vec<Option<Entry<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> LruCache<V> {
    /// Create a cache holding at most `capacity` entries. `capacity` must
    /// be at least 1 (validated by `CacheConfig::validate`).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Current entry count. Never exceeds the configured capacity.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a key, promoting a hit to most-recently-used.
    pub fn get(&mut self, key: &ContentKey) -> Option<Arc<V>> {
        let slot = *self.map.get(key)?;
        self.detach(slot);
        self.push_front(slot);
        self.slots[slot].as_ref().map(|e| Arc::clone(&e.value))
    }

    /// Insert or overwrite. A new key at capacity evicts exactly one
    /// least-recently-used entry first.
    pub fn put(&mut self, key: ContentKey, value: Arc<V>) {
        if let Some(&slot) = self.map.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.value = value;
            }
            self.detach(slot);
            self.push_front(slot);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_lru();
        }

        let entry = Entry {
            key,
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, slot);
        self.push_front(slot);
    }

    fn evict_lru(&mut self) {
        let Some(tail) = self.tail else { return };
        self.detach(tail);
        if let Some(entry) = self.slots[tail].take() {
            self.map.remove(&entry.key);
        }
        self.free.push(tail);
    }

    /// Unlink a slot from the recency list.
    fn detach(&mut self, slot: usize) {
        let (prev, next) = match &self.slots[slot] {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(entry) = self.slots[p].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = None;
        }
    }

    /// Link a detached slot in as most-recently-used.
    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(entry) = self.slots[h].as_mut() {
                entry.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}
