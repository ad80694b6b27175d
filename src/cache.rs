//! Fixed-capacity key/value cache with deterministic eviction.
//!
//! Entries live in a slot arena threaded onto a doubly-linked eviction list, with a
//! side index from key to slot, so `put`, `get` and `remove` are O(1). The list is
//! ordered by insertion (`EvictionOrder::Insertion`, the default) or by last access
//! (`EvictionOrder::Access`); the head of the list is always the next victim.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Evict the entry inserted longest ago; reads never change the order.
    #[default]
    Insertion,
    /// Evict the entry touched longest ago; `get` and overwriting `put` refresh it.
    Access,
}

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct BoundedCache<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
    order: EvictionOrder,
}

impl<K: Hash + Eq + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> AuthResult<Self> {
        Self::with_order(capacity, EvictionOrder::Insertion)
    }

    pub fn with_order(capacity: usize, order: EvictionOrder) -> AuthResult<Self> {
        if capacity == 0 {
            return Err(AuthError::CacheCapacityMisconfigured);
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
            order,
        })
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn order(&self) -> EvictionOrder { self.order }
    pub fn len(&self) -> usize { self.index.len() }
    pub fn is_empty(&self) -> bool { self.index.is_empty() }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. Returns the previous value when the key existed, or the
    /// evicted value when inserting a new key into a full cache.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            if self.order == EvictionOrder::Access {
                self.unlink(idx);
                self.link_back(idx);
            }
            let slot = self.slots[idx].as_mut()?;
            return Some(std::mem::replace(&mut slot.value, value));
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_front().map(|(_, v)| v)
        } else {
            None
        };

        let slot = Slot { key: key.clone(), value, prev: NIL, next: NIL };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_back(idx);
        self.index.insert(key, idx);
        evicted
    }

    /// Read-only lookup. Never alters eviction order; use [`BoundedCache::get_touch`]
    /// for access-ordered caches.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    /// Lookup that refreshes recency when the cache is access-ordered.
    pub fn get_touch<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        if self.order == EvictionOrder::Access && idx != self.tail {
            self.unlink(idx);
            self.link_back(idx);
        }
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|s| s.value)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from next-to-evict to most recent.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.head;
        while cur != NIL {
            match self.slots[cur].as_ref() {
                Some(slot) => {
                    out.push(slot.key.clone());
                    cur = slot.next;
                }
                None => break,
            }
        }
        out
    }

    fn pop_front(&mut self) -> Option<(K, V)> {
        let idx = self.head;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        self.free.push(idx);
        let slot = self.slots[idx].take()?;
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(s) => (s.prev, s.next),
            None => return,
        };
        if prev == NIL {
            self.head = next;
        } else if let Some(p) = self.slots[prev].as_mut() {
            p.next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else if let Some(n) = self.slots[next].as_mut() {
            n.prev = prev;
        }
        if let Some(s) = self.slots[idx].as_mut() {
            s.prev = NIL;
            s.next = NIL;
        }
    }

    fn link_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(s) = self.slots[idx].as_mut() {
            s.prev = old_tail;
            s.next = NIL;
        }
        if old_tail == NIL {
            self.head = idx;
        } else if let Some(t) = self.slots[old_tail].as_mut() {
            t.next = idx;
        }
        self.tail = idx;
    }
}

/// Thread-safe wrapper. Lookups on an insertion-ordered cache only take the read
/// lock; every mutation holds the write lock for the single collection operation.
#[derive(Debug)]
pub struct SharedCache<K, V> {
    inner: RwLock<BoundedCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SharedCache<K, V> {
    pub fn new(capacity: usize, order: EvictionOrder) -> AuthResult<Self> {
        Ok(Self { inner: RwLock::new(BoundedCache::with_order(capacity, order)?) })
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        {
            let guard = self.inner.read();
            if guard.order() == EvictionOrder::Insertion {
                return guard.get(key).cloned();
            }
        }
        self.inner.write().get_touch(key).cloned()
    }

    pub fn put(&self, key: K, value: V) -> Option<V> { self.inner.write().put(key, value) }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.write().remove(key)
    }

    pub fn clear(&self) { self.inner.write().clear() }

    pub fn len(&self) -> usize { self.inner.read().len() }

    pub fn is_empty(&self) -> bool { self.inner.read().is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(BoundedCache::<u32, u32>::new(0).unwrap_err(), AuthError::CacheCapacityMisconfigured);
    }

    #[test]
    fn insertion_order_evicts_first_inserted_even_after_get() {
        let mut c = BoundedCache::new(3).unwrap();
        c.put("a", 1);
        c.put("b", 2);
        c.put("c", 3);
        assert_eq!(c.get("a"), Some(&1));
        assert_eq!(c.get_touch("a"), Some(&1));
        let evicted = c.put("d", 4);
        assert_eq!(evicted, Some(1));
        assert_eq!(c.len(), 3);
        assert!(!c.contains_key("a"));
        assert_eq!(c.keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn overwrite_keeps_insertion_position() {
        let mut c = BoundedCache::new(2).unwrap();
        c.put(1, "one");
        c.put(2, "two");
        assert_eq!(c.put(1, "uno"), Some("one"));
        assert_eq!(c.put(3, "three"), Some("uno"));
        assert_eq!(c.keys(), vec![2, 3]);
    }

    #[test]
    fn access_order_refreshes_on_get_touch() {
        let mut c = BoundedCache::with_order(2, EvictionOrder::Access).unwrap();
        c.put(1, 10);
        c.put(2, 20);
        c.get_touch(&1);
        assert_eq!(c.put(3, 30), Some(20));
        assert_eq!(c.keys(), vec![1, 3]);
    }

    #[test]
    fn remove_unlinks_and_reuses_slots() {
        let mut c = BoundedCache::new(3).unwrap();
        c.put(1, 'a');
        c.put(2, 'b');
        c.put(3, 'c');
        assert_eq!(c.remove(&2), Some('b'));
        assert_eq!(c.remove(&2), None);
        assert_eq!(c.put(4, 'd'), None);
        assert_eq!(c.keys(), vec![1, 3, 4]);
        assert_eq!(c.put(5, 'e'), Some('a'));
        assert_eq!(c.keys(), vec![3, 4, 5]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut c = BoundedCache::new(5).unwrap();
        for i in 0..100 {
            c.put(i, i * 2);
            assert!(c.len() <= 5);
        }
        assert_eq!(c.keys(), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn shared_cache_round_trip() {
        let c: SharedCache<String, u32> = SharedCache::new(2, EvictionOrder::Access).unwrap();
        c.put("x".into(), 1);
        c.put("y".into(), 2);
        assert_eq!(c.get("x"), Some(1));
        c.put("z".into(), 3);
        assert_eq!(c.get("y"), None);
        assert_eq!(c.len(), 2);
        assert_eq!(c.remove("x"), Some(1));
        assert!(!c.is_empty());
    }
}
